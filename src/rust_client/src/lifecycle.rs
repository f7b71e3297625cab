use std::fmt;

use solana_program::{clock::UnixTimestamp, pubkey::Pubkey};
use time_capsule::state::CapsuleRecord;

use crate::error::{CapsuleClientError, Result};

/// Where a capsule stands at a given instant. `Locked` becomes `Unlockable`
/// by the passage of time alone; `Unlocked` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapsuleState {
    Locked,
    Unlockable,
    Unlocked,
}

impl CapsuleState {
    pub fn label(self) -> &'static str {
        match self {
            CapsuleState::Locked => "locked",
            CapsuleState::Unlockable => "ready to unlock",
            CapsuleState::Unlocked => "unlocked",
        }
    }
}

impl fmt::Display for CapsuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn state_at(record: &CapsuleRecord, now: UnixTimestamp) -> CapsuleState {
    if record.is_unlocked {
        CapsuleState::Unlocked
    } else if now >= record.release_timestamp {
        CapsuleState::Unlockable
    } else {
        CapsuleState::Locked
    }
}

pub fn can_unlock(record: &CapsuleRecord, now: UnixTimestamp) -> bool {
    state_at(record, now) == CapsuleState::Unlockable
}

/// Seconds left before the capsule becomes unlockable, zero once it is
pub fn seconds_until_unlock(record: &CapsuleRecord, now: UnixTimestamp) -> i64 {
    record.release_timestamp.saturating_sub(now).max(0)
}

pub fn assert_can_unlock(
    capsule: &Pubkey,
    record: &CapsuleRecord,
    now: UnixTimestamp,
) -> Result<()> {
    match state_at(record, now) {
        CapsuleState::Unlockable => Ok(()),
        CapsuleState::Unlocked => Err(CapsuleClientError::AlreadyUnlocked(*capsule)),
        CapsuleState::Locked => Err(CapsuleClientError::NotYetEligible {
            release_timestamp: record.release_timestamp,
            now,
        }),
    }
}

pub fn assert_owner(record: &CapsuleRecord, caller: &Pubkey) -> Result<()> {
    if record.owner != *caller {
        Err(CapsuleClientError::NotCapsuleOwner {
            owner: record.owner,
        })
    } else {
        Ok(())
    }
}

/// Applies a confirmed unlock to a cached record
pub fn mark_unlocked(
    capsule: &Pubkey,
    record: &mut CapsuleRecord,
    now: UnixTimestamp,
) -> Result<()> {
    if record.is_unlocked {
        return Err(CapsuleClientError::AlreadyUnlocked(*capsule));
    }
    record.is_unlocked = true;
    record.unlocked_at = Some(now);
    Ok(())
}
