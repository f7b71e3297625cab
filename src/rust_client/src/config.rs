use std::{collections::BTreeMap, fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;

use crate::{
    address::parse_account_id,
    error::{CapsuleClientError, Result},
};

pub const URL_DEVNET: &str = "https://api.devnet.solana.com";
pub const URL_DEVNET_ANKR: &str = "https://rpc.ankr.com/solana_devnet";
pub const URL_LOCAL: &str = "http://127.0.0.1:8899";

/// Messaging endpoint the unlock call attaches when a chain entry names none
pub const DEFAULT_MESSAGING_ENDPOINT: &str = "0x66A71Dcef29A0fFBDBE3c6a460a3B5BC225Cd675";

/// Bounded attempts with a fixed delay between them
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay_ms: u64) -> Self {
        RetryPolicy { attempts, delay_ms }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// A destination network reachable through the messaging layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Id the messaging layer uses for the network
    pub wire_chain_id: u16,
    /// Receiver contract, hex
    pub receiver_address: String,
    /// Messaging endpoint account on the source chain, base58 or hex
    #[serde(default = "default_messaging_endpoint")]
    pub messaging_endpoint: String,
}

fn default_messaging_endpoint() -> String {
    DEFAULT_MESSAGING_ENDPOINT.to_string()
}

/// Static client configuration, loaded once at startup and handed to each
/// component's constructor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// RPC endpoints, primary first
    pub endpoints: Vec<String>,
    /// Time Capsule program id, base58
    pub program_id: String,
    /// Chain key used when a command names none
    pub default_chain: String,
    /// Destination networks by chain key
    pub chains: BTreeMap<String, ChainConfig>,
    /// Transient submission failures
    pub retry: RetryPolicy,
    /// Waiting for a freshly initialized manager to become readable
    pub manager_poll: RetryPolicy,
    /// Waiting for a submitted transaction to confirm
    pub confirm: RetryPolicy,
    /// Indexes probed past the manager's capsule count during discovery
    pub scan_buffer: u64,
    /// Per-request timeout of the RPC client
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut chains = BTreeMap::new();
        chains.insert(
            "sepolia".to_string(),
            ChainConfig {
                wire_chain_id: 10161,
                receiver_address: "0x598C4Fb5aEb0F2965782a73c40972eCb8056E7FA".to_string(),
                messaging_endpoint: default_messaging_endpoint(),
            },
        );
        chains.insert(
            "arbitrum-sepolia".to_string(),
            ChainConfig {
                wire_chain_id: 10231,
                receiver_address: String::new(),
                messaging_endpoint: default_messaging_endpoint(),
            },
        );

        ClientConfig {
            endpoints: vec![URL_DEVNET.to_string(), URL_DEVNET_ANKR.to_string()],
            program_id: time_capsule::id().to_string(),
            default_chain: "sepolia".to_string(),
            chains,
            retry: RetryPolicy::new(3, 1000),
            manager_poll: RetryPolicy::new(5, 1000),
            confirm: RetryPolicy::new(30, 1000),
            scan_buffer: 10,
            request_timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    /// Reads a JSON config file; `None` yields the built-in devnet defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|err| {
                    CapsuleClientError::InvalidConfig(format!("{}: {err}", path.display()))
                })?;
                serde_json::from_str(&raw).map_err(|err| {
                    CapsuleClientError::InvalidConfig(format!("{}: {err}", path.display()))
                })?
            }
            None => ClientConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.program_id()?;
        if !self.chains.contains_key(&self.default_chain) {
            return Err(CapsuleClientError::InvalidConfig(format!(
                "default chain {:?} is not configured",
                self.default_chain
            )));
        }
        for (policy, name) in [
            (self.retry, "retry"),
            (self.manager_poll, "manager_poll"),
            (self.confirm, "confirm"),
        ] {
            if policy.attempts == 0 {
                return Err(CapsuleClientError::InvalidConfig(format!(
                    "{name}.attempts must be at least 1"
                )));
            }
        }
        let mut seen = BTreeMap::new();
        for (key, chain) in &self.chains {
            if let Some(previous) = seen.insert(chain.wire_chain_id, key) {
                return Err(CapsuleClientError::InvalidConfig(format!(
                    "chains {previous:?} and {key:?} share wire chain id {}",
                    chain.wire_chain_id
                )));
            }
        }
        Ok(())
    }

    pub fn program_id(&self) -> Result<Pubkey> {
        parse_account_id(&self.program_id)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
