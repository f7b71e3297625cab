//! Create, discover and unlock capsules.
//!
//! Every operation is a sequential pipeline of blocking round trips through
//! a [`LedgerRpc`]. Transient failures are retried with a fixed delay up to
//! the configured attempt count; semantic failures and declined signatures
//! surface immediately. Records touched during the session are cached in
//! memory, the ledger stays the source of truth.

use std::{
    collections::{HashMap, HashSet},
    thread::sleep,
};

use solana_program::{clock::UnixTimestamp, hash::Hash, instruction::Instruction, pubkey::Pubkey};
use solana_sdk::{signature::Signature, transaction::Transaction};
use time_capsule::{
    error::TimeCapsuleError,
    instruction::{self, CreateTextCapsule, CreateTokenCapsule},
    state::ManagerRecord,
};
use tracing::{debug, info, warn};

use crate::{
    address::{AddressDeriver, AddressScheme},
    clock::{SystemClock, TimeSource},
    config::{ClientConfig, RetryPolicy},
    decoder::{decode_capsule, DecodedCapsule, LOCKED_PLACEHOLDER},
    dispatch::{DispatchCoordinator, DispatchTarget},
    error::{CapsuleClientError, Result},
    lifecycle::{self, CapsuleState},
    rpc::LedgerRpc,
    wallet::WalletSigner,
};

/// What a new capsule locks
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapsuleContents {
    Text(String),
    Token { mint: Pubkey, amount: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCapsule {
    pub contents: CapsuleContents,
    pub release_timestamp: UnixTimestamp,
    /// Key of the destination chain in the client configuration
    pub chain_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedCapsule {
    pub address: Pubkey,
    pub scheme: AddressScheme,
    /// `None` when an earlier attempt landed without being confirmed in time
    pub signature: Option<Signature>,
    pub target: DispatchTarget,
}

/// A capsule found by [`CapsuleRegistryClient::discover`]
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredCapsule {
    pub capsule: DecodedCapsule,
    pub scheme: AddressScheme,
    pub state: CapsuleState,
    pub seconds_until_unlock: i64,
}

impl DiscoveredCapsule {
    pub fn address(&self) -> &Pubkey {
        &self.capsule.address
    }

    pub fn can_unlock(&self) -> bool {
        !self.capsule.is_error_state && self.state == CapsuleState::Unlockable
    }

    /// The message, or [`LOCKED_PLACEHOLDER`] until the capsule is unlocked
    pub fn visible_content(&self) -> &str {
        if self.state == CapsuleState::Unlocked && !self.capsule.is_error_state {
            &self.capsule.record.content
        } else {
            LOCKED_PLACEHOLDER
        }
    }
}

/// Result of a discovery scan
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Discovery {
    pub capsules: Vec<DiscoveredCapsule>,
    /// Addresses that stayed unreadable after every retry
    pub skipped: Vec<Pubkey>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnlockReceipt {
    pub address: Pubkey,
    /// `None` when an earlier attempt landed without being confirmed in time
    pub signature: Option<Signature>,
    pub unlocked_at: UnixTimestamp,
}

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of attempts. The closure receives the attempt number,
/// starting at zero.
pub fn with_retry<R>(
    policy: RetryPolicy,
    operation: &str,
    mut attempt: impl FnMut(u32) -> Result<R>,
) -> Result<R> {
    let mut tries = 0;
    loop {
        match attempt(tries) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && tries + 1 < policy.attempts => {
                tries += 1;
                warn!(operation, attempt = tries, %err, "transient failure, retrying");
                sleep(policy.delay());
            }
            Err(err) => return Err(err),
        }
    }
}

pub struct CapsuleRegistryClient<L, T = SystemClock> {
    ledger: L,
    clock: T,
    deriver: AddressDeriver,
    dispatch: DispatchCoordinator,
    retry: RetryPolicy,
    manager_poll: RetryPolicy,
    confirm: RetryPolicy,
    scan_buffer: u64,
    cache: HashMap<Pubkey, DecodedCapsule>,
}

impl<L: LedgerRpc> CapsuleRegistryClient<L> {
    pub fn new(config: &ClientConfig, ledger: L) -> Result<Self> {
        Self::with_clock(config, ledger, SystemClock)
    }
}

impl<L: LedgerRpc, T: TimeSource> CapsuleRegistryClient<L, T> {
    pub fn with_clock(config: &ClientConfig, ledger: L, clock: T) -> Result<Self> {
        let deriver = AddressDeriver::new(config.program_id()?);
        Ok(CapsuleRegistryClient {
            ledger,
            clock,
            dispatch: DispatchCoordinator::new(config, deriver)?,
            deriver,
            retry: config.retry,
            manager_poll: config.manager_poll,
            confirm: config.confirm,
            scan_buffer: config.scan_buffer,
            cache: HashMap::new(),
        })
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    pub fn dispatch(&self) -> &DispatchCoordinator {
        &self.dispatch
    }

    pub fn now(&self) -> UnixTimestamp {
        self.clock.now()
    }

    /// Last known state of a capsule seen during this session
    pub fn cached(&self, address: &Pubkey) -> Option<&DecodedCapsule> {
        self.cache.get(address)
    }

    /// Reads the manager. `None` if the account does not exist yet.
    pub fn fetch_manager(&self) -> Result<Option<ManagerRecord>> {
        let address = self.deriver.manager_address();
        match self.ledger.account_data(&address)? {
            Some(data) => ManagerRecord::unpack_account(&data)
                .map(Some)
                .map_err(|err| {
                    debug!(%address, %err, "manager account does not decode");
                    CapsuleClientError::ManagerUnavailable(address)
                }),
            None => Ok(None),
        }
    }

    /// Creates the manager unless it exists, then waits until it reads back
    pub fn initialize_manager(&self, wallet: &impl WalletSigner) -> Result<ManagerRecord> {
        if let Some(manager) = self.fetch_manager()? {
            debug!(capsule_count = manager.capsule_count, "manager already initialized");
            return Ok(manager);
        }

        let address = self.deriver.manager_address();
        info!(%address, "initializing manager");
        let ix = instruction::initialize(self.deriver.program_id(), &address, &wallet.pubkey());
        let submitted = with_retry(self.retry, "initialize", |_| {
            self.submit(wallet, &[ix.clone()], None)
        });
        if let Err(err) = submitted {
            // Someone else may have won the race to initialize
            if self.fetch_manager()?.is_none() {
                return Err(err);
            }
        }

        for attempt in 0..self.manager_poll.attempts {
            if let Some(manager) = self.fetch_manager()? {
                return Ok(manager);
            }
            debug!(attempt, "manager not readable yet");
            if attempt + 1 < self.manager_poll.attempts {
                sleep(self.manager_poll.delay());
            }
        }
        Err(CapsuleClientError::ManagerUnavailable(address))
    }

    pub fn create_text_capsule(
        &mut self,
        wallet: &impl WalletSigner,
        content: &str,
        release_timestamp: UnixTimestamp,
        chain_key: &str,
    ) -> Result<CreatedCapsule> {
        self.create_capsule(
            wallet,
            &NewCapsule {
                contents: CapsuleContents::Text(content.to_string()),
                release_timestamp,
                chain_key: chain_key.to_string(),
            },
        )
    }

    pub fn create_token_capsule(
        &mut self,
        wallet: &impl WalletSigner,
        mint: &Pubkey,
        amount: u64,
        release_timestamp: UnixTimestamp,
        chain_key: &str,
    ) -> Result<CreatedCapsule> {
        self.create_capsule(
            wallet,
            &NewCapsule {
                contents: CapsuleContents::Token {
                    mint: *mint,
                    amount,
                },
                release_timestamp,
                chain_key: chain_key.to_string(),
            },
        )
    }

    pub fn create_capsule(
        &mut self,
        wallet: &impl WalletSigner,
        request: &NewCapsule,
    ) -> Result<CreatedCapsule> {
        let target = self.dispatch.resolve(&request.chain_key)?;
        let payer = wallet.pubkey();
        self.initialize_manager(wallet)?;

        let mut previous: Option<(Pubkey, AddressScheme)> = None;
        let (address, scheme, signature) = with_retry(self.retry, "create", |attempt| {
            if let Some((address, scheme)) = previous.filter(|_| attempt > 0) {
                if self.holds_request(&address, &payer, request)? {
                    info!(%address, "an earlier create attempt landed");
                    return Ok((address, scheme, None));
                }
            }
            let (address, scheme) = self.next_capsule_address(&payer)?;
            previous = Some((address, scheme));
            let ix = self.create_instruction(&address, &payer, &target, request);
            let signature = self.submit(wallet, &[ix], Some(address))?;
            Ok((address, scheme, Some(signature)))
        })?;
        info!(%address, ?scheme, ?signature, chain = %target.chain_key, "capsule created");

        match self.fetch_capsule(&address) {
            Ok(decoded) if decoded.record.owner == payer && !decoded.is_error_state => {
                self.cache.insert(address, decoded);
            }
            Ok(decoded) => {
                warn!(
                    %address,
                    owner = %decoded.record.owner,
                    "created capsule does not read back as expected"
                );
            }
            Err(err) => warn!(%address, %err, "could not verify created capsule"),
        }

        Ok(CreatedCapsule {
            address,
            scheme,
            signature,
            target,
        })
    }

    /// Whether `address` already holds the capsule `request` describes
    fn holds_request(
        &self,
        address: &Pubkey,
        payer: &Pubkey,
        request: &NewCapsule,
    ) -> Result<bool> {
        let decoded = match self.fetch_capsule(address) {
            Ok(decoded) => decoded,
            Err(CapsuleClientError::CapsuleNotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        let record = &decoded.record;
        if decoded.is_error_state
            || record.owner != *payer
            || record.release_timestamp != request.release_timestamp
        {
            return Ok(false);
        }
        Ok(match &request.contents {
            CapsuleContents::Text(content) => !record.is_token() && record.content == *content,
            CapsuleContents::Token { mint, amount } => {
                record.token_mint == Some(*mint) && record.token_amount == Some(*amount)
            }
        })
    }

    /// Simple address while it is free, else the indexed address at the
    /// manager's current count
    fn next_capsule_address(&self, owner: &Pubkey) -> Result<(Pubkey, AddressScheme)> {
        let simple = self.deriver.simple_capsule_address(owner);
        if self.ledger.account_data(&simple)?.is_none() {
            return Ok((simple, AddressScheme::Simple));
        }

        let manager_address = self.deriver.manager_address();
        let manager = self
            .fetch_manager()?
            .ok_or(CapsuleClientError::ManagerUnavailable(manager_address))?;
        let index = manager.capsule_count;
        let indexed = self.deriver.capsule_address(owner, index);
        if self.ledger.account_data(&indexed)?.is_some() {
            return Err(CapsuleClientError::AddressCollision(indexed));
        }
        debug!(%owner, index, "simple address taken, using indexed address");
        Ok((indexed, AddressScheme::Indexed(index)))
    }

    fn create_instruction(
        &self,
        capsule: &Pubkey,
        payer: &Pubkey,
        target: &DispatchTarget,
        request: &NewCapsule,
    ) -> Instruction {
        let program_id = self.deriver.program_id();
        let manager = self.deriver.manager_address();
        match &request.contents {
            CapsuleContents::Text(content) => instruction::create_text_capsule(
                program_id,
                &manager,
                capsule,
                payer,
                CreateTextCapsule {
                    content: content.clone(),
                    release_timestamp: request.release_timestamp,
                    destination_chain_id: target.wire_chain_id,
                    destination_address: target.receiver,
                },
            ),
            CapsuleContents::Token { mint, amount } => instruction::create_token_capsule(
                program_id,
                &manager,
                capsule,
                payer,
                &self.dispatch.token_capsule_accounts(capsule, payer, mint),
                CreateTokenCapsule {
                    amount: *amount,
                    release_timestamp: request.release_timestamp,
                    destination_chain_id: target.wire_chain_id,
                    destination_address: target.receiver,
                },
            ),
        }
    }

    /// Fetches and decodes one capsule account
    pub fn fetch_capsule(&self, address: &Pubkey) -> Result<DecodedCapsule> {
        let data = self
            .ledger
            .account_data(address)?
            .ok_or(CapsuleClientError::CapsuleNotFound(*address))?;
        Ok(decode_capsule(address, &data))
    }

    /// Finds the capsules of `owner` under both address schemes. See
    /// [`CapsuleRegistryClient::discover_all`].
    pub fn discover(&mut self, owner: &Pubkey) -> Result<Vec<DiscoveredCapsule>> {
        self.discover_all(owner).map(|discovery| discovery.capsules)
    }

    /// Finds the capsules of `owner` under both address schemes. Reads are
    /// retried like any other transient failure; accounts still unreadable
    /// after that are reported in [`Discovery::skipped`]. Accounts that cannot
    /// be decoded come back flagged as error-state records. Fails with the
    /// last read error when nothing could be read.
    pub fn discover_all(&mut self, owner: &Pubkey) -> Result<Discovery> {
        let now = self.clock.now();
        let mut discovery = Discovery::default();
        let mut last_err = None;
        let mut seen = HashSet::new();

        let simple = self.deriver.simple_capsule_address(owner);
        seen.insert(simple);
        let mut candidates = vec![(simple, AddressScheme::Simple)];

        let manager = with_retry(self.retry, "discover", |_| self.fetch_manager());
        match manager {
            Ok(Some(manager)) if manager.capsule_count > 0 => {
                let end = manager.capsule_count.saturating_add(self.scan_buffer);
                debug!(%owner, end, "scanning indexed capsule addresses");
                for index in 0..end {
                    let address = self.deriver.capsule_address(owner, index);
                    if seen.insert(address) {
                        candidates.push((address, AddressScheme::Indexed(index)));
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "manager unavailable, only probing the simple address");
                last_err = Some(err);
            }
        }

        for (address, scheme) in candidates {
            match self.read_owned_capsule(&address, owner) {
                Ok(Some(capsule)) => discovery.capsules.push(discovered(capsule, scheme, now)),
                Ok(None) => {}
                Err(err) => {
                    warn!(%address, %err, "skipping unreadable capsule account");
                    discovery.skipped.push(address);
                    last_err = Some(err);
                }
            }
        }

        if discovery.capsules.is_empty() {
            if let Some(err) = last_err {
                return Err(err);
            }
        }

        info!(
            %owner,
            count = discovery.capsules.len(),
            skipped = discovery.skipped.len(),
            "discovery finished"
        );
        for capsule in &discovery.capsules {
            self.cache.insert(capsule.capsule.address, capsule.capsule.clone());
        }
        Ok(discovery)
    }

    fn read_owned_capsule(
        &self,
        address: &Pubkey,
        owner: &Pubkey,
    ) -> Result<Option<DecodedCapsule>> {
        let data = with_retry(self.retry, "discover", |_| self.ledger.account_data(address))?;
        let Some(data) = data else {
            return Ok(None);
        };
        let capsule = decode_capsule(address, &data);
        if capsule.record.owner == *owner {
            Ok(Some(capsule))
        } else {
            debug!(%address, "capsule belongs to another owner");
            Ok(None)
        }
    }

    /// Unlocks a capsule of the wallet's owner. Eligibility and ownership
    /// are checked before anything is signed.
    pub fn unlock(
        &mut self,
        wallet: &impl WalletSigner,
        capsule: &Pubkey,
    ) -> Result<UnlockReceipt> {
        let payer = wallet.pubkey();
        let decoded = self.fetch_capsule(capsule)?;
        if decoded.is_error_state {
            return Err(CapsuleClientError::SchemaDecode {
                address: *capsule,
                source: TimeCapsuleError::UnpackError,
            });
        }
        let mut record = decoded.record.clone();
        let now = self.clock.now();

        if record.is_unlocked {
            return Err(CapsuleClientError::AlreadyUnlocked(*capsule));
        }
        lifecycle::assert_owner(&record, &payer)?;
        lifecycle::assert_can_unlock(capsule, &record, now)?;

        let accounts = self.dispatch.unlock_accounts(capsule, &record, &payer)?;
        let ix = instruction::unlock_capsule(self.deriver.program_id(), &accounts);

        let signature = with_retry(self.retry, "unlock", |attempt| {
            if attempt > 0 && self.fetch_capsule(capsule)?.record.is_unlocked {
                info!(%capsule, "an earlier unlock attempt landed");
                return Ok(None);
            }
            match self.submit(wallet, &[ix.clone()], None) {
                Ok(signature) => Ok(Some(signature)),
                // An attempt still pending at the re-fetch landed first
                Err(CapsuleClientError::Program(TimeCapsuleError::CapsuleAlreadyUnlocked))
                    if attempt > 0 =>
                {
                    info!(%capsule, "an earlier unlock attempt landed");
                    Ok(None)
                }
                Err(err) => Err(err),
            }
        })
        .map_err(|err| {
            err.normalize_program_error(*capsule, record.owner, now, record.release_timestamp)
        })?;

        lifecycle::mark_unlocked(capsule, &mut record, now)?;
        info!(%capsule, "capsule unlocked");
        self.cache.insert(
            *capsule,
            DecodedCapsule {
                record,
                ..decoded
            },
        );

        Ok(UnlockReceipt {
            address: *capsule,
            signature,
            unlocked_at: now,
        })
    }

    fn submit(
        &self,
        wallet: &impl WalletSigner,
        instructions: &[Instruction],
        capsule: Option<Pubkey>,
    ) -> Result<Signature> {
        let payer = wallet.pubkey();
        let mut transaction = Transaction::new_with_payer(instructions, Some(&payer));
        let blockhash = self.ledger.latest_blockhash()?;
        wallet.sign_transaction(&mut transaction, blockhash)?;

        let signature = self
            .ledger
            .send_transaction(&transaction)
            .map_err(|err| err.into_client_error(capsule))?;
        debug!(%signature, "transaction submitted");

        self.confirm(&signature, &blockhash, capsule)?;
        info!(%signature, "transaction confirmed");
        Ok(signature)
    }

    fn confirm(
        &self,
        signature: &Signature,
        blockhash: &Hash,
        capsule: Option<Pubkey>,
    ) -> Result<()> {
        for attempt in 0..self.confirm.attempts {
            match self.ledger.signature_status(signature)? {
                Some(Ok(())) => return Ok(()),
                Some(Err(err)) => {
                    return Err(CapsuleClientError::from_transaction_error(&err, capsule))
                }
                None => {}
            }
            if !self.ledger.is_blockhash_valid(blockhash)? {
                return Err(CapsuleClientError::BlockhashExpired(signature.to_string()));
            }
            if attempt + 1 < self.confirm.attempts {
                sleep(self.confirm.delay());
            }
        }
        Err(CapsuleClientError::Unconfirmed(signature.to_string()))
    }
}

fn discovered(
    capsule: DecodedCapsule,
    scheme: AddressScheme,
    now: UnixTimestamp,
) -> DiscoveredCapsule {
    let state = if capsule.is_error_state {
        CapsuleState::Locked
    } else {
        lifecycle::state_at(&capsule.record, now)
    };
    let seconds_until_unlock = lifecycle::seconds_until_unlock(&capsule.record, now);
    DiscoveredCapsule {
        capsule,
        scheme,
        state,
        seconds_until_unlock,
    }
}
