#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
};

use capsule_client::{
    config::{ClientConfig, RetryPolicy},
    endpoint::Connector,
    error::{CapsuleClientError, Result},
    rpc::{LedgerRpc, SubmitError, TransactionStatus},
    wallet::WalletSigner,
    AddressDeriver,
};
use solana_program::{
    clock::UnixTimestamp,
    hash::Hash,
    instruction::InstructionError,
    program_pack::Pack,
    pubkey::Pubkey,
};
use solana_sdk::{
    signature::{Keypair, Signature, Signer},
    transaction::{Transaction, TransactionError},
};
use time_capsule::{
    error::TimeCapsuleError,
    instruction::{CreateTextCapsule, CreateTokenCapsule, TimeCapsuleInstruction},
    state::{CapsuleRecord, CapsuleType, ManagerRecord, MANAGER_ACCOUNT_SIZE},
    TOKEN_PROGRAM_ID,
};

pub const CAPSULE_ACCOUNT_SPACE: usize = 1200;

/// System program `AccountAlreadyInUse`
const ACCOUNT_IN_USE: u32 = 0;
/// `ConstraintSeeds`
const CONSTRAINT_SEEDS: u32 = 2006;
/// `AccountNotInitialized`
const ACCOUNT_NOT_INITIALIZED: u32 = 3012;

pub fn test_config() -> ClientConfig {
    ClientConfig {
        retry: RetryPolicy::new(3, 0),
        manager_poll: RetryPolicy::new(5, 0),
        confirm: RetryPolicy::new(5, 0),
        ..ClientConfig::default()
    }
}

pub fn deriver() -> AddressDeriver {
    AddressDeriver::new(time_capsule::id())
}

pub fn owner_of(wallet: &Keypair) -> Pubkey {
    Signer::pubkey(wallet)
}

/// An unlock as the messaging endpoint would have seen it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatched {
    pub capsule: Pubkey,
    pub destination_chain_id: u16,
    pub destination_address: [u8; 32],
    pub destination_token_account: Pubkey,
    pub messaging_endpoint: Pubkey,
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Pubkey, Vec<u8>>,
    statuses: HashMap<Signature, TransactionStatus>,
    dispatched: Vec<Dispatched>,
    unreadable: HashSet<Pubkey>,
    rate_limited: HashMap<Pubkey, u32>,
    late: Vec<Transaction>,
    land_late_next: u32,
    submitted: usize,
    drop_next: u32,
    race_next: u32,
    pending_polls: u32,
}

/// Ledger that runs the Time Capsule program's account effects in memory
pub struct MemoryLedger {
    state: RefCell<LedgerState>,
    blockhash: Cell<Hash>,
    now: Cell<UnixTimestamp>,
    offline: Cell<bool>,
    requests: Cell<usize>,
    deriver: AddressDeriver,
}

impl MemoryLedger {
    pub fn new(now: UnixTimestamp) -> Self {
        MemoryLedger {
            state: RefCell::new(LedgerState::default()),
            blockhash: Cell::new(Hash::new_unique()),
            now: Cell::new(now),
            offline: Cell::new(false),
            requests: Cell::new(0),
            deriver: deriver(),
        }
    }

    pub fn offline() -> Self {
        let ledger = MemoryLedger::new(0);
        ledger.offline.set(true);
        ledger
    }

    pub fn set_now(&self, now: UnixTimestamp) {
        self.now.set(now);
    }

    /// Every RPC call made so far, failed ones included
    pub fn requests(&self) -> usize {
        self.requests.get()
    }

    /// Transactions the ledger accepted for processing
    pub fn submitted(&self) -> usize {
        self.state.borrow().submitted
    }

    pub fn dispatched(&self) -> Vec<Dispatched> {
        self.state.borrow().dispatched.clone()
    }

    pub fn put_account(&self, address: Pubkey, data: Vec<u8>) {
        self.state.borrow_mut().accounts.insert(address, data);
    }

    pub fn raw_account(&self, address: &Pubkey) -> Option<Vec<u8>> {
        self.state.borrow().accounts.get(address).cloned()
    }

    pub fn capsule(&self, address: &Pubkey) -> Option<CapsuleRecord> {
        let data = self.raw_account(address)?;
        CapsuleRecord::try_from_account_data(&data).ok()
    }

    pub fn manager(&self) -> Option<ManagerRecord> {
        let data = self.raw_account(&self.deriver.manager_address())?;
        ManagerRecord::unpack_account(&data).ok()
    }

    /// Reads of `address` fail with a connectivity error
    pub fn make_unreadable(&self, address: Pubkey) {
        self.state.borrow_mut().unreadable.insert(address);
    }

    /// The next `times` reads of `address` are rate limited
    pub fn rate_limit_reads(&self, address: Pubkey, times: u32) {
        self.state.borrow_mut().rate_limited.insert(address, times);
    }

    /// The next `count` transactions stay pending until another transaction
    /// is sent, and land just before it
    pub fn land_late(&self, count: u32) {
        self.state.borrow_mut().land_late_next = count;
    }

    /// The next `count` transactions are accepted but never processed, and
    /// their blockhash expires
    pub fn drop_next(&self, count: u32) {
        self.state.borrow_mut().drop_next = count;
    }

    /// Before each of the next `count` capsule creations, a concurrent
    /// creation from the same owner takes the target address first
    pub fn race_next_creations(&self, count: u32) {
        self.state.borrow_mut().race_next = count;
    }

    /// Signature status reads return "not processed yet" `polls` times
    pub fn delay_confirmations(&self, polls: u32) {
        self.state.borrow_mut().pending_polls = polls;
    }

    fn request(&self) -> Result<()> {
        self.requests.set(self.requests.get() + 1);
        if self.offline.get() {
            Err(CapsuleClientError::Connectivity("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn process(&self, transaction: &Transaction) -> std::result::Result<(), TransactionError> {
        transaction.verify()?;
        if transaction.message.recent_blockhash != self.blockhash.get() {
            return Err(TransactionError::BlockhashNotFound);
        }

        let keys = &transaction.message.account_keys;
        let instructions: Vec<(Vec<Pubkey>, &[u8])> = transaction
            .message
            .instructions
            .iter()
            .filter(|compiled| keys[compiled.program_id_index as usize] == time_capsule::id())
            .map(|compiled| {
                let accounts = compiled
                    .accounts
                    .iter()
                    .map(|position| keys[*position as usize])
                    .collect();
                (accounts, compiled.data.as_slice())
            })
            .collect();

        for (instruction_accounts, data) in &instructions {
            if is_creation(data) && self.take_race() {
                self.race(instruction_accounts);
            }
        }

        let mut accounts = self.state.borrow().accounts.clone();
        let mut dispatched = Vec::new();
        for (index, (instruction_accounts, data)) in instructions.iter().enumerate() {
            self.process_instruction(&mut accounts, &mut dispatched, instruction_accounts, data)
                .map_err(|err| TransactionError::InstructionError(index as u8, err))?;
        }

        let mut state = self.state.borrow_mut();
        state.accounts = accounts;
        state.dispatched.extend(dispatched);
        Ok(())
    }

    fn process_instruction(
        &self,
        accounts: &mut HashMap<Pubkey, Vec<u8>>,
        dispatched: &mut Vec<Dispatched>,
        keys: &[Pubkey],
        data: &[u8],
    ) -> std::result::Result<(), InstructionError> {
        let instruction = TimeCapsuleInstruction::unpack(data)
            .map_err(|_| InstructionError::InvalidInstructionData)?;
        let keys = &mut keys.iter().copied();

        match instruction {
            TimeCapsuleInstruction::Initialize => initialize(accounts, keys),
            TimeCapsuleInstruction::CreateTextCapsule(ctx) => {
                let CreateTextCapsule {
                    content,
                    release_timestamp,
                    destination_chain_id,
                    destination_address,
                } = ctx;
                let template = CapsuleRecord {
                    owner: Pubkey::default(),
                    capsule_type: CapsuleType::Text,
                    release_timestamp,
                    created_at: self.now.get(),
                    is_unlocked: false,
                    unlocked_at: None,
                    content,
                    token_mint: None,
                    token_amount: None,
                    destination_chain_id,
                    destination_address,
                };
                self.create_capsule(accounts, keys, template, None)
            }
            TimeCapsuleInstruction::CreateTokenCapsule(ctx) => {
                let CreateTokenCapsule {
                    amount,
                    release_timestamp,
                    destination_chain_id,
                    destination_address,
                } = ctx;
                let template = CapsuleRecord {
                    owner: Pubkey::default(),
                    capsule_type: CapsuleType::Token,
                    release_timestamp,
                    created_at: self.now.get(),
                    is_unlocked: false,
                    unlocked_at: None,
                    content: String::new(),
                    token_mint: None,
                    token_amount: Some(amount),
                    destination_chain_id,
                    destination_address,
                };
                self.create_capsule(accounts, keys, template, Some(amount))
            }
            TimeCapsuleInstruction::UnlockCapsule => self.unlock(accounts, dispatched, keys),
        }
    }

    fn create_capsule(
        &self,
        accounts: &mut HashMap<Pubkey, Vec<u8>>,
        keys: &mut impl Iterator<Item = Pubkey>,
        mut capsule: CapsuleRecord,
        token_amount: Option<u64>,
    ) -> std::result::Result<(), InstructionError> {
        let manager_key = next_key(keys)?;
        let capsule_key = next_key(keys)?;
        let payer = next_key(keys)?;
        if token_amount.is_some() {
            let mint = next_key(keys)?;
            let _source = next_key(keys)?;
            let vault = next_key(keys)?;
            let token_program = next_key(keys)?;
            if token_program != TOKEN_PROGRAM_ID {
                return Err(custom(TimeCapsuleError::InvalidTokenProgram));
            }
            if vault != self.deriver.token_vault_address(&capsule_key) {
                return Err(custom(TimeCapsuleError::InvalidTokenAccount));
            }
            capsule.token_mint = Some(mint);
        }

        let mut manager = accounts
            .get(&manager_key)
            .and_then(|data| ManagerRecord::unpack_account(data).ok())
            .ok_or(InstructionError::Custom(ACCOUNT_NOT_INITIALIZED))?;

        let simple = self.deriver.simple_capsule_address(&payer);
        let indexed = self.deriver.capsule_address(&payer, manager.capsule_count);
        if accounts.contains_key(&capsule_key) {
            return Err(InstructionError::Custom(ACCOUNT_IN_USE));
        }
        if capsule_key != simple && capsule_key != indexed {
            return Err(InstructionError::Custom(CONSTRAINT_SEEDS));
        }

        capsule.owner = payer;
        capsule.check_creation().map_err(custom)?;

        accounts.insert(capsule_key, capsule_data(&capsule));
        manager.capsule_count += 1;
        accounts.insert(manager_key, manager_data(&manager));
        Ok(())
    }

    fn unlock(
        &self,
        accounts: &mut HashMap<Pubkey, Vec<u8>>,
        dispatched: &mut Vec<Dispatched>,
        keys: &mut impl Iterator<Item = Pubkey>,
    ) -> std::result::Result<(), InstructionError> {
        let capsule_key = next_key(keys)?;
        let payer = next_key(keys)?;
        let vault = next_key(keys)?;
        let destination_token_account = next_key(keys)?;
        let token_program = next_key(keys)?;
        let messaging_endpoint = next_key(keys)?;

        let mut capsule = accounts
            .get(&capsule_key)
            .and_then(|data| CapsuleRecord::try_from_account_data(data).ok())
            .ok_or(InstructionError::Custom(ACCOUNT_NOT_INITIALIZED))?;

        if capsule.is_unlocked {
            return Err(custom(TimeCapsuleError::CapsuleAlreadyUnlocked));
        }
        if self.now.get() < capsule.release_timestamp {
            return Err(custom(TimeCapsuleError::CapsuleNotReadyForUnlock));
        }
        if capsule.owner != payer {
            return Err(custom(TimeCapsuleError::NotCapsuleOwner));
        }
        if capsule.is_token() {
            if token_program != TOKEN_PROGRAM_ID {
                return Err(custom(TimeCapsuleError::InvalidTokenProgram));
            }
            if vault != self.deriver.token_vault_address(&capsule_key) {
                return Err(custom(TimeCapsuleError::InvalidTokenAccount));
            }
        }

        capsule.is_unlocked = true;
        capsule.unlocked_at = Some(self.now.get());
        accounts.insert(capsule_key, capsule_data(&capsule));
        dispatched.push(Dispatched {
            capsule: capsule_key,
            destination_chain_id: capsule.destination_chain_id,
            destination_address: capsule.destination_address,
            destination_token_account,
            messaging_endpoint,
        });
        Ok(())
    }

    /// A concurrent creation from the same payer lands on `keys[1]` first
    fn race(&self, keys: &[Pubkey]) {
        let (Some(manager_key), Some(capsule_key), Some(payer)) =
            (keys.first(), keys.get(1), keys.get(2))
        else {
            return;
        };
        let mut state = self.state.borrow_mut();
        let Some(mut manager) = state
            .accounts
            .get(manager_key)
            .and_then(|data| ManagerRecord::unpack_account(data).ok())
        else {
            return;
        };

        let racer = CapsuleRecord {
            owner: *payer,
            capsule_type: CapsuleType::Text,
            release_timestamp: self.now.get() + 60,
            created_at: self.now.get(),
            is_unlocked: false,
            unlocked_at: None,
            content: "raced".to_string(),
            token_mint: None,
            token_amount: None,
            destination_chain_id: 10161,
            destination_address: [0; 32],
        };
        state.accounts.insert(*capsule_key, capsule_data(&racer));
        manager.capsule_count += 1;
        state.accounts.insert(*manager_key, manager_data(&manager));
    }

    fn take_race(&self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.race_next > 0 {
            state.race_next -= 1;
            true
        } else {
            false
        }
    }
}

fn initialize(
    accounts: &mut HashMap<Pubkey, Vec<u8>>,
    keys: &mut impl Iterator<Item = Pubkey>,
) -> std::result::Result<(), InstructionError> {
    let manager_key = next_key(keys)?;
    let authority = next_key(keys)?;

    if accounts.contains_key(&manager_key) {
        return Err(InstructionError::Custom(ACCOUNT_IN_USE));
    }
    if manager_key != deriver().manager_address() {
        return Err(InstructionError::Custom(CONSTRAINT_SEEDS));
    }

    let manager = ManagerRecord {
        is_initialized: true,
        authority,
        capsule_count: 0,
    };
    accounts.insert(manager_key, manager_data(&manager));
    Ok(())
}

fn next_key(
    keys: &mut impl Iterator<Item = Pubkey>,
) -> std::result::Result<Pubkey, InstructionError> {
    keys.next().ok_or(InstructionError::NotEnoughAccountKeys)
}

fn is_creation(data: &[u8]) -> bool {
    matches!(
        TimeCapsuleInstruction::unpack(data),
        Ok(TimeCapsuleInstruction::CreateTextCapsule(_)
            | TimeCapsuleInstruction::CreateTokenCapsule(_))
    )
}

fn custom(err: TimeCapsuleError) -> InstructionError {
    InstructionError::Custom(err.custom_code())
}

pub fn capsule_data(capsule: &CapsuleRecord) -> Vec<u8> {
    capsule
        .to_account_data(CAPSULE_ACCOUNT_SPACE)
        .expect("capsule encodes")
}

pub fn manager_data(manager: &ManagerRecord) -> Vec<u8> {
    let mut data = vec![0; MANAGER_ACCOUNT_SIZE];
    manager.pack_into_slice(&mut data);
    data
}

/// A capsule account in the positional layout the structured decoder
/// rejects
pub fn legacy_capsule_data(
    owner: &Pubkey,
    release_timestamp: UnixTimestamp,
    unlocked: bool,
    content: &str,
) -> Vec<u8> {
    let mut data = vec![0x5a; 8];
    data.extend_from_slice(owner.as_ref());
    data.push(CapsuleType::Text.tag());
    data.extend_from_slice(&release_timestamp.to_le_bytes());
    data.extend_from_slice(&(release_timestamp - 3600).to_le_bytes());
    data.push(unlocked as u8);
    data.extend_from_slice(&(content.len() as u32).to_le_bytes());
    data.extend_from_slice(content.as_bytes());
    data.extend_from_slice(&[0; 32]);
    data.extend_from_slice(&10161u16.to_le_bytes());
    data
}

impl LedgerRpc for MemoryLedger {
    fn latest_blockhash(&self) -> Result<Hash> {
        self.request()?;
        Ok(self.blockhash.get())
    }

    fn is_blockhash_valid(&self, blockhash: &Hash) -> Result<bool> {
        self.request()?;
        Ok(*blockhash == self.blockhash.get())
    }

    fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        self.request()?;
        let mut state = self.state.borrow_mut();
        if state.unreadable.contains(address) {
            return Err(CapsuleClientError::Connectivity(format!("{address}: timed out")));
        }
        if let Some(remaining) = state.rate_limited.get_mut(address).filter(|left| **left > 0) {
            *remaining -= 1;
            return Err(CapsuleClientError::RateLimited(
                "429 Too Many Requests".to_string(),
            ));
        }
        drop(state);
        Ok(self.raw_account(address))
    }

    fn send_transaction(
        &self,
        transaction: &Transaction,
    ) -> std::result::Result<Signature, SubmitError> {
        self.request().map_err(SubmitError::Rpc)?;
        let signature = transaction.signatures[0];

        let late = std::mem::take(&mut self.state.borrow_mut().late);
        for pending in late {
            let status = self.process(&pending);
            let mut state = self.state.borrow_mut();
            if status.is_ok() {
                state.submitted += 1;
            }
            state.statuses.insert(pending.signatures[0], status);
        }

        {
            let mut state = self.state.borrow_mut();
            if state.land_late_next > 0 {
                state.land_late_next -= 1;
                state.late.push(transaction.clone());
                return Ok(signature);
            }
            if state.drop_next > 0 {
                state.drop_next -= 1;
                self.blockhash.set(Hash::new_unique());
                return Ok(signature);
            }
        }

        self.process(transaction).map_err(SubmitError::Rejected)?;
        let mut state = self.state.borrow_mut();
        state.submitted += 1;
        state.statuses.insert(signature, Ok(()));
        Ok(signature)
    }

    fn signature_status(&self, signature: &Signature) -> Result<Option<TransactionStatus>> {
        self.request()?;
        let mut state = self.state.borrow_mut();
        if state.pending_polls > 0 {
            state.pending_polls -= 1;
            return Ok(None);
        }
        Ok(state.statuses.get(signature).cloned())
    }

    fn balance(&self, _address: &Pubkey) -> Result<u64> {
        self.request()?;
        Ok(1_000_000_000)
    }
}

/// A wallet whose holder rejects every signing prompt
pub struct DecliningWallet {
    pub key: Pubkey,
    pub prompts: Cell<u32>,
}

impl DecliningWallet {
    pub fn new() -> Self {
        DecliningWallet {
            key: Pubkey::new_unique(),
            prompts: Cell::new(0),
        }
    }
}

impl WalletSigner for DecliningWallet {
    fn pubkey(&self) -> Pubkey {
        self.key
    }

    fn sign_transaction(&self, _transaction: &mut Transaction, _blockhash: Hash) -> Result<()> {
        self.prompts.set(self.prompts.get() + 1);
        Err(CapsuleClientError::SigningDeclined("user rejected the request".to_string()))
    }
}

/// Connector whose endpoints are healthy only when listed
pub struct ScriptedConnector {
    healthy: HashSet<String>,
    pub attempts: RefCell<Vec<String>>,
}

impl ScriptedConnector {
    pub fn new(healthy: &[&str]) -> Self {
        ScriptedConnector {
            healthy: healthy.iter().map(|endpoint| endpoint.to_string()).collect(),
            attempts: RefCell::new(Vec::new()),
        }
    }
}

impl Connector for ScriptedConnector {
    type Ledger = MemoryLedger;

    fn connect(&self, endpoint: &str) -> Result<MemoryLedger> {
        self.attempts.borrow_mut().push(endpoint.to_string());
        if self.healthy.contains(endpoint) {
            Ok(MemoryLedger::new(0))
        } else {
            Ok(MemoryLedger::offline())
        }
    }
}
