//! Error types

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use solana_program::program_error::ProgramError;
use thiserror::Error;

/// Offset the program adds to its custom error codes
pub const CUSTOM_ERROR_OFFSET: u32 = 6000;

/// Errors raised by the Time Capsule program, plus the account decoding
/// failures a client can hit when reading its accounts.
#[derive(Clone, Copy, Debug, Eq, Error, FromPrimitive, PartialEq)]
pub enum TimeCapsuleError {
    /// Release timestamp must be in the future
    #[error("Release timestamp must be in the future")]
    InvalidReleaseTime,
    /// Capsule was unlocked before
    #[error("Capsule is already unlocked")]
    CapsuleAlreadyUnlocked,
    /// Release timestamp not reached yet
    #[error("Capsule is not ready to be unlocked yet")]
    CapsuleNotReadyForUnlock,
    /// Signer is not the capsule owner
    #[error("Only the capsule owner can unlock it")]
    NotCapsuleOwner,
    /// Token capsule unlocked without the token accounts
    #[error("Token accounts required for unlocking token capsule are missing")]
    MissingTokenAccounts,
    /// Wrong token program passed
    #[error("Invalid token program")]
    InvalidTokenProgram,
    /// Capsule token account is not the expected vault PDA
    #[error("Invalid token account")]
    InvalidTokenAccount,
    /// Account data does not start with the expected discriminator
    #[error("Account discriminator did not match")]
    AccountDiscriminatorMismatch,
    /// Account or instruction data could not be deserialized
    #[error("There was an issue deserializing account data")]
    UnpackError,
}

impl TimeCapsuleError {
    /// Maps a custom program error code (as reported in a transaction error)
    /// back to the error that produced it.
    pub fn from_custom_code(code: u32) -> Option<Self> {
        code.checked_sub(CUSTOM_ERROR_OFFSET)
            .and_then(<Self as FromPrimitive>::from_u32)
    }

    /// The custom code the program reports for this error
    pub fn custom_code(self) -> u32 {
        CUSTOM_ERROR_OFFSET + self as u32
    }
}

impl From<TimeCapsuleError> for ProgramError {
    fn from(e: TimeCapsuleError) -> Self {
        ProgramError::Custom(e.custom_code())
    }
}
