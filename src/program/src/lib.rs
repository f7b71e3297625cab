//! Interface of a program that locks a message or tokens until a unix
//! timestamp and notifies a receiver on another chain when unlocked
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod instruction;
pub mod state;

use solana_program::{pubkey, pubkey::Pubkey};

/// Id of the deployed Time Capsule program
pub const ID: Pubkey = pubkey!("428gGmLitQZZHuz6SFW9TycS4b9JsULpB3yM4Wi6Jvos");

/// SPL token program
pub const TOKEN_PROGRAM_ID: Pubkey = pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");

/// SPL associated token account program
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Returns the id of the deployed program
pub fn id() -> Pubkey {
    ID
}
