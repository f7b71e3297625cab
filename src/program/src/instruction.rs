//! The definitions for Time Capsule instructions

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{
    clock::UnixTimestamp,
    hash::hashv,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program, sysvar,
};

use crate::{error::TimeCapsuleError, state::DISCRIMINATOR_LEN};

/// CreateTextCapsule instruction data
#[derive(Clone, Debug, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct CreateTextCapsule {
    /// The message to lock
    pub content: String,
    /// The time the capsule may be unlocked from
    pub release_timestamp: UnixTimestamp,
    /// Wire chain id of the destination network
    pub destination_chain_id: u16,
    /// Receiver on the destination network, left-zero-padded
    pub destination_address: [u8; 32],
}

/// CreateTokenCapsule instruction data
#[derive(Clone, Debug, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct CreateTokenCapsule {
    /// The number of tokens to lock
    pub amount: u64,
    /// The time the capsule may be unlocked from
    pub release_timestamp: UnixTimestamp,
    /// Wire chain id of the destination network
    pub destination_chain_id: u16,
    /// Receiver on the destination network, left-zero-padded
    pub destination_address: [u8; 32],
}

/// A Time Capsule instruction
#[derive(Clone, Debug, PartialEq)]
pub enum TimeCapsuleInstruction {
    /// Create the manager account
    /// Requires that the manager account does not exist.
    ///
    /// # Account references
    ///   0. `[WRITE]` Manager account
    ///   1. `[SIGNER, WRITE]` Authority account
    ///   2. `[]` System program account
    Initialize,

    /// Create a text capsule and increment the manager's capsule count
    /// Requires that `release_timestamp` is in the future.
    ///
    /// # Account references
    ///   0. `[WRITE]` Manager account
    ///   1. `[WRITE]` Capsule account
    ///   2. `[SIGNER, WRITE]` Payer account, becomes the capsule owner
    ///   3. `[]` System program account
    CreateTextCapsule(CreateTextCapsule),

    /// Create a token capsule, moving `amount` tokens into the capsule's
    /// token vault, and increment the manager's capsule count
    ///
    /// # Account references
    ///   0. `[WRITE]` Manager account
    ///   1. `[WRITE]` Capsule account
    ///   2. `[SIGNER, WRITE]` Payer account, becomes the capsule owner
    ///   3. `[]` Mint account
    ///   4. `[WRITE]` Source token account of the payer
    ///   5. `[WRITE]` Capsule token vault
    ///   6. `[]` Token program account
    ///   7. `[]` System program account
    ///   8. `[]` Rent sysvar
    CreateTokenCapsule(CreateTokenCapsule),

    /// Unlock a capsule and dispatch its cross-chain message
    /// Requires that the capsule is locked, that the current time is greater
    /// than or equal to the release timestamp and that the payer owns it.
    ///
    /// Transitions:
    /// Locked -> Unlocked
    ///     Token capsules transfer the vault balance to the destination token account.
    ///
    /// # Account references
    ///   0. `[WRITE]` Capsule account
    ///   1. `[SIGNER, WRITE]` Payer account
    ///   2. `[WRITE]` Capsule token vault
    ///   3. `[WRITE]` Destination token account (the payer for non-token capsules)
    ///   4. `[]` Token program account
    ///   5. `[]` Messaging endpoint account
    ///   6. `[]` System program account
    ///   7. `[]` Rent sysvar
    UnlockCapsule,
}

/// Computes the 8-byte instruction discriminator: the first bytes of
/// `sha256("global:<name>")`.
pub fn sighash(name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let hash = hashv(&[b"global:", name.as_bytes()]).to_bytes();
    let mut discriminator = [0; DISCRIMINATOR_LEN];
    discriminator.copy_from_slice(&hash[..DISCRIMINATOR_LEN]);
    discriminator
}

impl TimeCapsuleInstruction {
    /// Name the program dispatches the instruction on
    pub fn name(&self) -> &'static str {
        match self {
            TimeCapsuleInstruction::Initialize => "initialize",
            TimeCapsuleInstruction::CreateTextCapsule(_) => "create_text_capsule",
            TimeCapsuleInstruction::CreateTokenCapsule(_) => "create_token_capsule",
            TimeCapsuleInstruction::UnlockCapsule => "unlock_capsule",
        }
    }

    /// Encodes the instruction: discriminator followed by the Borsh encoded arguments
    pub fn pack(&self) -> Vec<u8> {
        let mut data = sighash(self.name()).to_vec();
        let args = match self {
            TimeCapsuleInstruction::CreateTextCapsule(args) => borsh::to_vec(args),
            TimeCapsuleInstruction::CreateTokenCapsule(args) => borsh::to_vec(args),
            TimeCapsuleInstruction::Initialize | TimeCapsuleInstruction::UnlockCapsule => {
                Ok(Vec::new())
            }
        };
        // Serializing into a Vec cannot fail
        data.extend(args.unwrap_or_default());
        data
    }

    /// Decodes instruction data produced by [`TimeCapsuleInstruction::pack`]
    pub fn unpack(data: &[u8]) -> Result<Self, TimeCapsuleError> {
        if data.len() < DISCRIMINATOR_LEN {
            return Err(TimeCapsuleError::UnpackError);
        }
        let (discriminator, args) = data.split_at(DISCRIMINATOR_LEN);

        if discriminator == sighash("initialize") {
            Ok(TimeCapsuleInstruction::Initialize)
        } else if discriminator == sighash("create_text_capsule") {
            CreateTextCapsule::try_from_slice(args)
                .map(TimeCapsuleInstruction::CreateTextCapsule)
                .map_err(|_| TimeCapsuleError::UnpackError)
        } else if discriminator == sighash("create_token_capsule") {
            CreateTokenCapsule::try_from_slice(args)
                .map(TimeCapsuleInstruction::CreateTokenCapsule)
                .map_err(|_| TimeCapsuleError::UnpackError)
        } else if discriminator == sighash("unlock_capsule") {
            Ok(TimeCapsuleInstruction::UnlockCapsule)
        } else {
            Err(TimeCapsuleError::UnpackError)
        }
    }
}

/// Accounts attached to an `UnlockCapsule` instruction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnlockAccounts {
    /// The capsule being unlocked
    pub capsule: Pubkey,
    /// The capsule owner, signing the transaction
    pub payer: Pubkey,
    /// The capsule's token vault
    pub capsule_token_account: Pubkey,
    /// Where unlocked tokens go; a neutral placeholder for non-token capsules
    pub destination_token_account: Pubkey,
    /// The token program
    pub token_program: Pubkey,
    /// The messaging endpoint that relays the unlock notification
    pub messaging_endpoint: Pubkey,
}

/// Accounts attached to a `CreateTokenCapsule` instruction, besides the
/// manager, capsule and payer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenCapsuleAccounts {
    /// Mint of the locked tokens
    pub mint: Pubkey,
    /// Token account the tokens are debited from
    pub source_token_account: Pubkey,
    /// The capsule's token vault
    pub capsule_token_account: Pubkey,
    /// The token program
    pub token_program: Pubkey,
}

/// Creates an `Initialize` instruction
pub fn initialize(program_id: &Pubkey, manager: &Pubkey, authority: &Pubkey) -> Instruction {
    Instruction::new_with_bytes(
        *program_id,
        &TimeCapsuleInstruction::Initialize.pack(),
        vec![
            AccountMeta::new(*manager, false),
            AccountMeta::new(*authority, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    )
}

/// Creates a `CreateTextCapsule` instruction
pub fn create_text_capsule(
    program_id: &Pubkey,
    manager: &Pubkey,
    capsule: &Pubkey,
    payer: &Pubkey,
    args: CreateTextCapsule,
) -> Instruction {
    Instruction::new_with_bytes(
        *program_id,
        &TimeCapsuleInstruction::CreateTextCapsule(args).pack(),
        vec![
            AccountMeta::new(*manager, false),
            AccountMeta::new(*capsule, false),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    )
}

/// Creates a `CreateTokenCapsule` instruction
pub fn create_token_capsule(
    program_id: &Pubkey,
    manager: &Pubkey,
    capsule: &Pubkey,
    payer: &Pubkey,
    token_accounts: &TokenCapsuleAccounts,
    args: CreateTokenCapsule,
) -> Instruction {
    Instruction::new_with_bytes(
        *program_id,
        &TimeCapsuleInstruction::CreateTokenCapsule(args).pack(),
        vec![
            AccountMeta::new(*manager, false),
            AccountMeta::new(*capsule, false),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(token_accounts.mint, false),
            AccountMeta::new(token_accounts.source_token_account, false),
            AccountMeta::new(token_accounts.capsule_token_account, false),
            AccountMeta::new_readonly(token_accounts.token_program, false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ],
    )
}

/// Creates an `UnlockCapsule` instruction
pub fn unlock_capsule(program_id: &Pubkey, accounts: &UnlockAccounts) -> Instruction {
    Instruction::new_with_bytes(
        *program_id,
        &TimeCapsuleInstruction::UnlockCapsule.pack(),
        vec![
            AccountMeta::new(accounts.capsule, false),
            AccountMeta::new(accounts.payer, true),
            AccountMeta::new(accounts.capsule_token_account, false),
            AccountMeta::new(accounts.destination_token_account, false),
            AccountMeta::new_readonly(accounts.token_program, false),
            AccountMeta::new_readonly(accounts.messaging_endpoint, false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ],
    )
}
