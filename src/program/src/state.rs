//! Program state
#![deny(missing_docs)]

use arrayref::{array_mut_ref, array_ref, array_refs, mut_array_refs};
use borsh::{BorshDeserialize, BorshSerialize};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use solana_program::{
    clock::UnixTimestamp,
    hash::hashv,
    program_error::ProgramError,
    program_pack::{IsInitialized, Pack, Sealed},
    pubkey::Pubkey,
};

use crate::error::TimeCapsuleError;

/// Seed of the manager PDA
pub const MANAGER_SEED: &[u8] = b"manager";
/// Seed prefix of capsule PDAs
pub const TIME_CAPSULE_SEED: &[u8] = b"time_capsule";
/// Seed prefix of capsule token vault PDAs
pub const TOKEN_ACCOUNT_SEED: &[u8] = b"token_account";

/// Length of the account discriminator every program account starts with
pub const DISCRIMINATOR_LEN: usize = 8;

/// Computes the 8-byte discriminator of an account type: the first bytes of
/// `sha256("account:<Name>")`.
pub fn account_discriminator(name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let hash = hashv(&[b"account:", name.as_bytes()]).to_bytes();
    let mut discriminator = [0; DISCRIMINATOR_LEN];
    discriminator.copy_from_slice(&hash[..DISCRIMINATOR_LEN]);
    discriminator
}

/// Kind of item locked in a capsule
#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
pub enum CapsuleType {
    /// A text message
    Text,
    /// An SPL token amount held in the capsule's token vault
    Token,
    /// An NFT
    Nft,
}

impl CapsuleType {
    /// Wire tag of the type
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Type for a wire tag, if the tag is known
    pub fn from_tag(tag: u8) -> Option<Self> {
        <Self as FromPrimitive>::from_u8(tag)
    }
}

/// The singleton manager account. Counts the capsules created through the
/// program; the count seeds indexed capsule addresses.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ManagerRecord {
    // 8
    /// Set once the account has been written by `initialize`
    pub is_initialized: bool,
    // 32
    /// Authority that initialized the manager
    pub authority: Pubkey,
    // 8
    /// Number of capsules created so far
    pub capsule_count: u64,
}

/// The size of a manager account
pub const MANAGER_ACCOUNT_SIZE: usize = DISCRIMINATOR_LEN + AUTHORITY_LEN + CAPSULE_COUNT_LEN;

/// Size of the manager authority field
pub const AUTHORITY_LEN: usize = 32;
/// Size of the manager capsule counter
pub const CAPSULE_COUNT_LEN: usize = 8;

impl ManagerRecord {
    /// Account type name used for the discriminator
    pub const ACCOUNT_NAME: &'static str = "TimeCapsuleManager";

    /// Discriminator of manager accounts
    pub fn discriminator() -> [u8; DISCRIMINATOR_LEN] {
        account_discriminator(Self::ACCOUNT_NAME)
    }

    /// Decodes a manager account. The account may be larger than
    /// [`MANAGER_ACCOUNT_SIZE`]; trailing bytes are ignored.
    pub fn unpack_account(data: &[u8]) -> Result<Self, ProgramError> {
        let data = data
            .get(..MANAGER_ACCOUNT_SIZE)
            .ok_or(TimeCapsuleError::UnpackError)?;
        let manager = Self::unpack_from_slice(data)?;
        if !manager.is_initialized() {
            return Err(TimeCapsuleError::AccountDiscriminatorMismatch.into());
        }
        Ok(manager)
    }
}

impl IsInitialized for ManagerRecord {
    fn is_initialized(&self) -> bool {
        self.is_initialized
    }
}

impl Sealed for ManagerRecord {}
impl Pack for ManagerRecord {
    const LEN: usize = MANAGER_ACCOUNT_SIZE;

    fn pack_into_slice(&self, dst: &mut [u8]) {
        let dst = array_mut_ref![dst, 0, MANAGER_ACCOUNT_SIZE];

        let (discriminator_dst, authority_dst, capsule_count_dst) =
            mut_array_refs![dst, DISCRIMINATOR_LEN, AUTHORITY_LEN, CAPSULE_COUNT_LEN];

        if self.is_initialized {
            discriminator_dst.copy_from_slice(&Self::discriminator());
        } else {
            discriminator_dst.fill(0);
        }
        authority_dst.copy_from_slice(self.authority.as_ref());
        *capsule_count_dst = self.capsule_count.to_le_bytes();
    }

    fn unpack_from_slice(src: &[u8]) -> Result<Self, ProgramError> {
        if src.len() < MANAGER_ACCOUNT_SIZE {
            return Err(TimeCapsuleError::UnpackError.into());
        }
        let src = array_ref![src, 0, MANAGER_ACCOUNT_SIZE];

        let (discriminator_src, authority_src, capsule_count_src) =
            array_refs![src, DISCRIMINATOR_LEN, AUTHORITY_LEN, CAPSULE_COUNT_LEN];

        let is_initialized = match *discriminator_src {
            [0, 0, 0, 0, 0, 0, 0, 0] => false,
            discriminator if discriminator == Self::discriminator() => true,
            _ => return Err(TimeCapsuleError::AccountDiscriminatorMismatch.into()),
        };

        Ok(ManagerRecord {
            is_initialized,
            authority: Pubkey::new_from_array(*authority_src),
            capsule_count: u64::from_le_bytes(*capsule_count_src),
        })
    }
}

/// A capsule account
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq)]
pub struct CapsuleRecord {
    /// Creator of the capsule
    pub owner: Pubkey,
    /// Kind of locked item
    pub capsule_type: CapsuleType,
    /// Time the capsule becomes unlockable
    pub release_timestamp: UnixTimestamp,
    /// Creation time
    pub created_at: UnixTimestamp,
    /// Set once by a successful unlock
    pub is_unlocked: bool,
    /// Time of the unlock, present iff `is_unlocked`
    pub unlocked_at: Option<UnixTimestamp>,
    /// Message of a text capsule
    pub content: String,
    /// Mint of a token capsule
    pub token_mint: Option<Pubkey>,
    /// Amount locked in a token capsule
    pub token_amount: Option<u64>,
    /// Wire chain id of the destination network
    pub destination_chain_id: u16,
    /// Receiver address on the destination network, left-zero-padded
    pub destination_address: [u8; 32],
}

/// Size of the fixed part of a capsule account that precedes the message
pub const CAPSULE_HEADER_LEN: usize = DISCRIMINATOR_LEN + 32;

impl CapsuleRecord {
    /// Account type name used for the discriminator
    pub const ACCOUNT_NAME: &'static str = "TimeCapsule";

    /// Discriminator of capsule accounts
    pub fn discriminator() -> [u8; DISCRIMINATOR_LEN] {
        account_discriminator(Self::ACCOUNT_NAME)
    }

    /// Decodes a capsule account: discriminator, then the Borsh encoded
    /// record. Trailing bytes are allowed since the program over-allocates
    /// space for the message.
    pub fn try_from_account_data(data: &[u8]) -> Result<Self, TimeCapsuleError> {
        if data.len() < DISCRIMINATOR_LEN {
            return Err(TimeCapsuleError::UnpackError);
        }
        let (discriminator, mut body) = data.split_at(DISCRIMINATOR_LEN);
        if discriminator != Self::discriminator() {
            return Err(TimeCapsuleError::AccountDiscriminatorMismatch);
        }
        Self::deserialize(&mut body).map_err(|_| TimeCapsuleError::UnpackError)
    }

    /// Encodes the record as account data, zero padded up to `space` bytes
    pub fn to_account_data(&self, space: usize) -> Result<Vec<u8>, TimeCapsuleError> {
        let mut data = Self::discriminator().to_vec();
        self.serialize(&mut data)
            .map_err(|_| TimeCapsuleError::UnpackError)?;
        if data.len() < space {
            data.resize(space, 0);
        }
        Ok(data)
    }

    /// Validates the invariants a freshly created capsule must hold
    pub fn check_creation(&self) -> Result<(), TimeCapsuleError> {
        if self.release_timestamp <= self.created_at {
            return Err(TimeCapsuleError::InvalidReleaseTime);
        }
        Ok(())
    }

    /// Whether the capsule carries tokens
    pub fn is_token(&self) -> bool {
        self.capsule_type == CapsuleType::Token
    }
}
