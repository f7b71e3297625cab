//! Capsule account decoding.
//!
//! The structured path checks the account discriminator and decodes the full
//! Borsh record. When that fails, [`extract_capsule_data`] reads the fields
//! positionally from the raw bytes. The two paths share nothing but the
//! output type.
//!
//! Positional layout after the 40-byte header (discriminator + owner):
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 1 | capsule type tag |
//! | 1 | 8 | release timestamp, i64 LE |
//! | 9 | 8 | creation timestamp, i64 LE |
//! | 17 | 1 | unlocked flag |
//! | 18 | 4 | content length, u32 LE |
//! | 22 | n | content, UTF-8 |
//! | len - 34 | 32 | destination address |
//! | len - 2 | 2 | destination chain id, u16 LE |

use chrono::{DateTime, Datelike, TimeZone, Utc};
use solana_program::{clock::UnixTimestamp, pubkey::Pubkey};
use time_capsule::state::{CapsuleRecord, CapsuleType, CAPSULE_HEADER_LEN, DISCRIMINATOR_LEN};
use tracing::{debug, warn};

use crate::error::{CapsuleClientError, Result};

/// Content shown in place of a message that is still locked
pub const LOCKED_PLACEHOLDER: &str = "locked";

const FIXED_FIELDS_LEN: usize = 22;
const TAIL_LEN: usize = 34;
const MIN_YEAR: i32 = 2000;
const MAX_YEAR: i32 = 2100;

/// Which decoder produced a record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeSource {
    Structured,
    Fallback,
}

/// A capsule account as read from chain
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedCapsule {
    pub address: Pubkey,
    pub record: CapsuleRecord,
    pub source: DecodeSource,
    /// The bytes could not be decoded; `record` only carries placeholders
    /// (and the owner, when the header was readable)
    pub is_error_state: bool,
}

impl DecodedCapsule {
    fn error_state(address: Pubkey, owner: Pubkey) -> Self {
        DecodedCapsule {
            address,
            record: CapsuleRecord {
                owner,
                capsule_type: CapsuleType::Text,
                release_timestamp: 0,
                created_at: 0,
                is_unlocked: false,
                unlocked_at: None,
                content: LOCKED_PLACEHOLDER.to_string(),
                token_mint: None,
                token_amount: None,
                destination_chain_id: 0,
                destination_address: [0; 32],
            },
            source: DecodeSource::Fallback,
            is_error_state: true,
        }
    }

    pub fn release_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.record.release_timestamp, 0).single()
    }
}

/// Decodes with the account schema
pub fn decode_structured(address: &Pubkey, data: &[u8]) -> Result<CapsuleRecord> {
    CapsuleRecord::try_from_account_data(data).map_err(|source| CapsuleClientError::SchemaDecode {
        address: *address,
        source,
    })
}

/// Decodes a capsule account, falling back to the positional decoder when
/// the structured one fails. Never fails: undecodable bytes come back as an
/// error-state record.
pub fn decode_capsule(address: &Pubkey, data: &[u8]) -> DecodedCapsule {
    match decode_structured(address, data) {
        Ok(record) => DecodedCapsule {
            address: *address,
            record,
            source: DecodeSource::Structured,
            is_error_state: false,
        },
        Err(err) => {
            debug!(%address, %err, "structured decode failed, reading fields positionally");
            extract_capsule_data(address, data)
        }
    }
}

/// Positional decoder. Message content is only decoded for unlocked
/// capsules; locked ones get [`LOCKED_PLACEHOLDER`].
pub fn extract_capsule_data(address: &Pubkey, data: &[u8]) -> DecodedCapsule {
    let owner = data
        .get(DISCRIMINATOR_LEN..CAPSULE_HEADER_LEN)
        .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
        .map(Pubkey::new_from_array)
        .unwrap_or_default();

    match read_fields(data, owner) {
        Ok(record) => DecodedCapsule {
            address: *address,
            record,
            source: DecodeSource::Fallback,
            is_error_state: false,
        },
        Err(reason) => {
            warn!(%address, reason, "capsule account is unreadable");
            DecodedCapsule::error_state(*address, owner)
        }
    }
}

fn read_fields(data: &[u8], owner: Pubkey) -> std::result::Result<CapsuleRecord, &'static str> {
    let body = data.get(CAPSULE_HEADER_LEN..).ok_or("buffer shorter than header")?;
    if body.len() < FIXED_FIELDS_LEN + TAIL_LEN {
        return Err("buffer truncated");
    }

    let capsule_type = CapsuleType::from_tag(body[0]).ok_or("unknown capsule type")?;
    let release_timestamp = read_i64(body, 1).ok_or("release timestamp truncated")?;
    let created_at = read_i64(body, 9).ok_or("creation timestamp truncated")?;
    let is_unlocked = body[17] != 0;
    let content_length = read_u32(body, 18).ok_or("content length truncated")? as usize;

    if !plausible_year(release_timestamp) {
        return Err("release date out of range");
    }

    if content_length > body.len() - FIXED_FIELDS_LEN - TAIL_LEN {
        return Err("content length exceeds buffer");
    }

    let content = if is_unlocked {
        let bytes = &body[FIXED_FIELDS_LEN..FIXED_FIELDS_LEN + content_length];
        std::str::from_utf8(bytes)
            .map_err(|_| "content is not UTF-8")?
            .to_string()
    } else {
        LOCKED_PLACEHOLDER.to_string()
    };

    let tail = &body[body.len() - TAIL_LEN..];
    let mut destination_address = [0u8; 32];
    destination_address.copy_from_slice(&tail[..32]);
    let destination_chain_id = u16::from_le_bytes([tail[32], tail[33]]);

    Ok(CapsuleRecord {
        owner,
        capsule_type,
        release_timestamp,
        created_at,
        is_unlocked,
        unlocked_at: None,
        content,
        token_mint: None,
        token_amount: None,
        destination_chain_id,
        destination_address,
    })
}

fn read_i64(bytes: &[u8], offset: usize) -> Option<i64> {
    let raw = bytes.get(offset..offset + 8)?;
    Some(i64::from_le_bytes(raw.try_into().ok()?))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

fn plausible_year(timestamp: UnixTimestamp) -> bool {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|date| (MIN_YEAR..=MAX_YEAR).contains(&date.year()))
        .unwrap_or(false)
}
