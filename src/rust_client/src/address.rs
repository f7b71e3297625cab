//! Deterministic account addresses of the Time Capsule program.
//!
//! Capsules live under one of two schemes. The *simple* address is seeded by
//! the owner alone and holds at most one capsule per owner; the *indexed*
//! address adds the manager's capsule counter so an owner can hold more.
//! Capsules exist on chain under both.

use std::str::FromStr;

use solana_program::pubkey::Pubkey;
use time_capsule::{
    state::{MANAGER_SEED, TIME_CAPSULE_SEED, TOKEN_ACCOUNT_SEED},
    ASSOCIATED_TOKEN_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
use tracing::trace;

use crate::error::{CapsuleClientError, Result};

/// Which derivation produced a capsule address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressScheme {
    Simple,
    Indexed(u64),
}

/// Parses a base58 account id
pub fn parse_account_id(value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value.trim()).map_err(|_| CapsuleClientError::InvalidKey(value.to_string()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressDeriver {
    program_id: Pubkey,
}

impl AddressDeriver {
    pub fn new(program_id: Pubkey) -> Self {
        AddressDeriver { program_id }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    pub fn manager_address(&self) -> Pubkey {
        Pubkey::find_program_address(&[MANAGER_SEED], &self.program_id).0
    }

    pub fn capsule_address(&self, owner: &Pubkey, index: u64) -> Pubkey {
        let address = Pubkey::find_program_address(
            &[TIME_CAPSULE_SEED, owner.as_ref(), &index.to_le_bytes()],
            &self.program_id,
        )
        .0;
        trace!(%owner, index, %address, "derived indexed capsule address");
        address
    }

    pub fn simple_capsule_address(&self, owner: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[TIME_CAPSULE_SEED, owner.as_ref()], &self.program_id).0
    }

    pub fn address_for(&self, owner: &Pubkey, scheme: AddressScheme) -> Pubkey {
        match scheme {
            AddressScheme::Simple => self.simple_capsule_address(owner),
            AddressScheme::Indexed(index) => self.capsule_address(owner, index),
        }
    }

    pub fn token_vault_address(&self, capsule: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[TOKEN_ACCOUNT_SEED, capsule.as_ref()], &self.program_id).0
    }

    /// The owner's associated token account for `mint`
    pub fn associated_token_address(&self, wallet: &Pubkey, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(
            &[wallet.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
            &ASSOCIATED_TOKEN_PROGRAM_ID,
        )
        .0
    }

    /// String front end of [`AddressDeriver::capsule_address`]
    pub fn capsule_address_for(&self, owner: &str, index: u64) -> Result<Pubkey> {
        Ok(self.capsule_address(&parse_account_id(owner)?, index))
    }

    /// String front end of [`AddressDeriver::simple_capsule_address`]
    pub fn simple_capsule_address_for(&self, owner: &str) -> Result<Pubkey> {
        Ok(self.simple_capsule_address(&parse_account_id(owner)?))
    }
}
