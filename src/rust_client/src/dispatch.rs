//! Cross-chain dispatch: maps a chain key onto the messaging layer's wire id
//! and receiver, and assembles the account set of unlock calls.

use std::collections::BTreeMap;

use solana_program::pubkey::Pubkey;
use time_capsule::{
    instruction::{TokenCapsuleAccounts, UnlockAccounts},
    state::CapsuleRecord,
    TOKEN_PROGRAM_ID,
};
use tracing::{debug, warn};

use crate::{
    address::{parse_account_id, AddressDeriver},
    config::{ClientConfig, DEFAULT_MESSAGING_ENDPOINT},
    error::{CapsuleClientError, Result},
};

/// Width of the destination address field carried by the messaging layer
pub const DESTINATION_ADDRESS_LEN: usize = 32;

/// Encodes a hex address as the messaging layer's fixed 32-byte field:
/// optional `0x` stripped, left-padded with zeros to 64 hex digits.
pub fn encode_destination_address(address: &str) -> Result<[u8; DESTINATION_ADDRESS_LEN]> {
    let trimmed = address.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty()
        || digits.len() > DESTINATION_ADDRESS_LEN * 2
        || !digits.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Err(CapsuleClientError::InvalidDestinationAddress(
            address.to_string(),
        ));
    }

    let padded = format!("{digits:0>64}");
    let mut encoded = [0u8; DESTINATION_ADDRESS_LEN];
    hex::decode_to_slice(padded, &mut encoded)
        .map_err(|_| CapsuleClientError::InvalidDestinationAddress(address.to_string()))?;
    Ok(encoded)
}

/// Full 64-digit hex form of an encoded destination
pub fn decode_destination_address(encoded: &[u8; DESTINATION_ADDRESS_LEN]) -> String {
    format!("0x{}", hex::encode(encoded))
}

/// The 20-byte EVM address held in an encoded destination, if the padding
/// leaves room for one
pub fn evm_address(encoded: &[u8; DESTINATION_ADDRESS_LEN]) -> Option<String> {
    let (padding, address) = encoded.split_at(DESTINATION_ADDRESS_LEN - 20);
    padding
        .iter()
        .all(|b| *b == 0)
        .then(|| format!("0x{}", hex::encode(address)))
}

/// Parses a messaging endpoint given either as base58 or as hex
pub fn parse_messaging_endpoint(value: &str) -> Result<Pubkey> {
    if value.trim_start().starts_with("0x") {
        Ok(Pubkey::new_from_array(encode_destination_address(value)?))
    } else {
        parse_account_id(value)
    }
}

/// Where an unlock notification for a chain key goes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchTarget {
    pub chain_key: String,
    pub wire_chain_id: u16,
    pub receiver: [u8; DESTINATION_ADDRESS_LEN],
    pub messaging_endpoint: Pubkey,
}

#[derive(Clone, Debug)]
struct ChainEntry {
    wire_chain_id: u16,
    receiver: Option<[u8; DESTINATION_ADDRESS_LEN]>,
    messaging_endpoint: Pubkey,
}

#[derive(Clone, Debug)]
pub struct DispatchCoordinator {
    deriver: AddressDeriver,
    chains: BTreeMap<String, ChainEntry>,
    fallback_endpoint: Pubkey,
}

impl DispatchCoordinator {
    pub fn new(config: &ClientConfig, deriver: AddressDeriver) -> Result<Self> {
        let mut chains = BTreeMap::new();
        for (key, chain) in &config.chains {
            let receiver = if chain.receiver_address.trim().is_empty() {
                None
            } else {
                Some(encode_destination_address(&chain.receiver_address)?)
            };
            chains.insert(
                key.clone(),
                ChainEntry {
                    wire_chain_id: chain.wire_chain_id,
                    receiver,
                    messaging_endpoint: parse_messaging_endpoint(&chain.messaging_endpoint)?,
                },
            );
        }

        Ok(DispatchCoordinator {
            deriver,
            chains,
            fallback_endpoint: parse_messaging_endpoint(DEFAULT_MESSAGING_ENDPOINT)?,
        })
    }

    /// Resolves a chain key. Fails before any transaction is built when the
    /// key is unknown or has no receiver contract.
    pub fn resolve(&self, chain_key: &str) -> Result<DispatchTarget> {
        let entry = self
            .chains
            .get(chain_key)
            .ok_or_else(|| CapsuleClientError::UnsupportedDestinationChain(chain_key.to_string()))?;
        let receiver = entry
            .receiver
            .ok_or_else(|| CapsuleClientError::MissingDestinationContract(chain_key.to_string()))?;

        debug!(chain_key, wire_chain_id = entry.wire_chain_id, "resolved destination chain");
        Ok(DispatchTarget {
            chain_key: chain_key.to_string(),
            wire_chain_id: entry.wire_chain_id,
            receiver,
            messaging_endpoint: entry.messaging_endpoint,
        })
    }

    pub fn chain_key_for_id(&self, wire_chain_id: u16) -> Option<&str> {
        self.chains
            .iter()
            .find(|(_, entry)| entry.wire_chain_id == wire_chain_id)
            .map(|(key, _)| key.as_str())
    }

    /// Configured chains as `(key, wire id, has receiver)`
    pub fn chains(&self) -> impl Iterator<Item = (&str, u16, bool)> {
        self.chains
            .iter()
            .map(|(key, entry)| (key.as_str(), entry.wire_chain_id, entry.receiver.is_some()))
    }

    fn messaging_endpoint_for(&self, wire_chain_id: u16) -> Pubkey {
        match self
            .chains
            .values()
            .find(|entry| entry.wire_chain_id == wire_chain_id)
        {
            Some(entry) => entry.messaging_endpoint,
            None => {
                // Ids are only checked at creation; the message may go nowhere.
                warn!(
                    wire_chain_id,
                    "capsule targets a chain id that is no longer configured"
                );
                self.fallback_endpoint
            }
        }
    }

    /// Accounts of an unlock call. Non-token capsules get the payer as the
    /// token destination so every unlock has the same account shape.
    pub fn unlock_accounts(
        &self,
        capsule: &Pubkey,
        record: &CapsuleRecord,
        payer: &Pubkey,
    ) -> Result<UnlockAccounts> {
        let destination_token_account = if record.is_token() {
            let mint = record
                .token_mint
                .ok_or(CapsuleClientError::MissingTokenMint)?;
            self.deriver.associated_token_address(payer, &mint)
        } else {
            *payer
        };

        Ok(UnlockAccounts {
            capsule: *capsule,
            payer: *payer,
            capsule_token_account: self.deriver.token_vault_address(capsule),
            destination_token_account,
            token_program: TOKEN_PROGRAM_ID,
            messaging_endpoint: self.messaging_endpoint_for(record.destination_chain_id),
        })
    }

    /// Token accounts of a token capsule creation
    pub fn token_capsule_accounts(
        &self,
        capsule: &Pubkey,
        payer: &Pubkey,
        mint: &Pubkey,
    ) -> TokenCapsuleAccounts {
        TokenCapsuleAccounts {
            mint: *mint,
            source_token_account: self.deriver.associated_token_address(payer, mint),
            capsule_token_account: self.deriver.token_vault_address(capsule),
            token_program: TOKEN_PROGRAM_ID,
        }
    }
}
