use solana_program::{instruction::InstructionError, pubkey::Pubkey};
use solana_sdk::transaction::TransactionError;
use thiserror::Error;
use time_capsule::error::TimeCapsuleError;

/// Broad class of a failure. Orchestration decides retry versus fail-fast
/// on this, not on the individual variant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Endpoint unreachable or rate limited
    Connectivity,
    /// Malformed or unexpected account bytes
    Decode,
    /// The request can never succeed as issued
    Semantic,
    /// Submission, confirmation or signing failure
    Transaction,
    /// Invalid static configuration or input
    Config,
}

#[derive(Debug, Error)]
pub enum CapsuleClientError {
    #[error("no RPC endpoint answered the liveness probe ({attempted} tried)")]
    NoEndpointAvailable { attempted: usize },
    #[error("RPC endpoint is rate limiting requests, try again later: {0}")]
    RateLimited(String),
    #[error("RPC request failed: {0}")]
    Connectivity(String),

    #[error("invalid account id {0:?}")]
    InvalidKey(String),
    #[error("invalid destination address {0:?}: expected at most 64 hex digits")]
    InvalidDestinationAddress(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("account {address} does not match the capsule schema: {source}")]
    SchemaDecode {
        address: Pubkey,
        source: TimeCapsuleError,
    },
    #[error("manager account {0} is not readable")]
    ManagerUnavailable(Pubkey),
    #[error("no capsule at {0}")]
    CapsuleNotFound(Pubkey),

    #[error("destination chain {0:?} is not supported")]
    UnsupportedDestinationChain(String),
    #[error("no receiver contract configured for destination chain {0:?}")]
    MissingDestinationContract(String),
    #[error("capsule is not unlockable before {release_timestamp} (now {now})")]
    NotYetEligible {
        release_timestamp: i64,
        now: i64,
    },
    #[error("capsule {0} is already unlocked")]
    AlreadyUnlocked(Pubkey),
    #[error("only the capsule owner {owner} can unlock it")]
    NotCapsuleOwner { owner: Pubkey },
    #[error("capsule address {0} is already taken, re-derive from a fresh counter")]
    AddressCollision(Pubkey),
    #[error("token capsules need a mint")]
    MissingTokenMint,
    #[error("program rejected the transaction: {0}")]
    Program(TimeCapsuleError),

    #[error("signing declined: {0}")]
    SigningDeclined(String),
    #[error("transaction failed: {0}")]
    Transaction(String),
    #[error("transaction {0} was not confirmed before its blockhash expired")]
    BlockhashExpired(String),
    #[error("transaction {0} was not confirmed in time")]
    Unconfirmed(String),
}

pub type Result<T> = std::result::Result<T, CapsuleClientError>;

impl CapsuleClientError {
    pub fn kind(&self) -> ErrorKind {
        use CapsuleClientError::*;
        match self {
            NoEndpointAvailable { .. } | RateLimited(_) | Connectivity(_) => {
                ErrorKind::Connectivity
            }
            InvalidKey(_) | InvalidDestinationAddress(_) | InvalidConfig(_) => ErrorKind::Config,
            SchemaDecode { .. } | ManagerUnavailable(_) | CapsuleNotFound(_) => ErrorKind::Decode,
            UnsupportedDestinationChain(_)
            | MissingDestinationContract(_)
            | NotYetEligible { .. }
            | AlreadyUnlocked(_)
            | NotCapsuleOwner { .. }
            | MissingTokenMint
            | Program(_) => ErrorKind::Semantic,
            AddressCollision(_)
            | SigningDeclined(_)
            | Transaction(_)
            | BlockhashExpired(_)
            | Unconfirmed(_) => ErrorKind::Transaction,
        }
    }

    /// Transient failures worth another attempt with the same inputs.
    /// Semantic failures and a declined signature never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CapsuleClientError::RateLimited(_)
                | CapsuleClientError::Connectivity(_)
                | CapsuleClientError::AddressCollision(_)
                | CapsuleClientError::BlockhashExpired(_)
                | CapsuleClientError::Unconfirmed(_)
        )
    }

    /// Classifies a transaction error returned by the cluster. Custom codes
    /// raised by the program become [`CapsuleClientError::Program`]; an
    /// already-used capsule address becomes an address collision.
    pub fn from_transaction_error(err: &TransactionError, capsule: Option<Pubkey>) -> Self {
        match err {
            TransactionError::InstructionError(_, InstructionError::Custom(code)) => {
                match (TimeCapsuleError::from_custom_code(*code), capsule) {
                    (Some(program_err), _) => CapsuleClientError::Program(program_err),
                    // System program `AccountAlreadyInUse`
                    (None, Some(capsule)) if *code == 0 => {
                        CapsuleClientError::AddressCollision(capsule)
                    }
                    _ => CapsuleClientError::Transaction(err.to_string()),
                }
            }
            TransactionError::BlockhashNotFound => {
                CapsuleClientError::BlockhashExpired(err.to_string())
            }
            _ => CapsuleClientError::Transaction(err.to_string()),
        }
    }

    /// Maps the program errors that have a dedicated client variant onto it,
    /// so a rejection on chain reads the same as the local pre-check.
    pub fn normalize_program_error(
        self,
        capsule: Pubkey,
        owner: Pubkey,
        now: i64,
        release: i64,
    ) -> Self {
        match self {
            CapsuleClientError::Program(TimeCapsuleError::CapsuleAlreadyUnlocked) => {
                CapsuleClientError::AlreadyUnlocked(capsule)
            }
            CapsuleClientError::Program(TimeCapsuleError::NotCapsuleOwner) => {
                CapsuleClientError::NotCapsuleOwner { owner }
            }
            CapsuleClientError::Program(TimeCapsuleError::CapsuleNotReadyForUnlock) => {
                CapsuleClientError::NotYetEligible {
                    release_timestamp: release,
                    now,
                }
            }
            other => other,
        }
    }
}
