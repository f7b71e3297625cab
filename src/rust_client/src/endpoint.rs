use std::time::Duration;

use solana_client::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    error::{CapsuleClientError, Result},
    rpc::LedgerRpc,
};

/// Opens a ledger handle for an endpoint URL
pub trait Connector {
    type Ledger: LedgerRpc;

    fn connect(&self, endpoint: &str) -> Result<Self::Ledger>;
}

impl<C: Connector + ?Sized> Connector for &C {
    type Ledger = C::Ledger;

    fn connect(&self, endpoint: &str) -> Result<Self::Ledger> {
        (**self).connect(endpoint)
    }
}

/// Connects with the blocking JSON RPC client
#[derive(Clone, Debug)]
pub struct RpcConnector {
    timeout: Duration,
    commitment: CommitmentConfig,
}

impl RpcConnector {
    pub fn new(timeout: Duration) -> Self {
        RpcConnector {
            timeout,
            commitment: CommitmentConfig::confirmed(),
        }
    }
}

impl Connector for RpcConnector {
    type Ledger = RpcClient;

    fn connect(&self, endpoint: &str) -> Result<RpcClient> {
        Ok(RpcClient::new_with_timeout_and_commitment(
            endpoint.to_string(),
            self.timeout,
            self.commitment,
        ))
    }
}

/// A ledger handle whose endpoint answered the liveness probe
pub struct Connection<L> {
    pub endpoint: String,
    pub ledger: L,
}

pub struct EndpointResolver<C> {
    connector: C,
    endpoints: Vec<String>,
}

impl EndpointResolver<RpcConnector> {
    pub fn from_config(config: &ClientConfig) -> Self {
        EndpointResolver::new(
            RpcConnector::new(config.request_timeout()),
            config.endpoints.clone(),
        )
    }
}

impl<C: Connector> EndpointResolver<C> {
    /// `endpoints` are tried in order, primary first
    pub fn new(connector: C, endpoints: Vec<String>) -> Self {
        EndpointResolver {
            connector,
            endpoints,
        }
    }

    /// Returns the first endpoint that serves a recent blockhash. Each
    /// candidate gets one probe.
    pub fn resolve(&self) -> Result<Connection<C::Ledger>> {
        for endpoint in &self.endpoints {
            debug!(endpoint, "probing RPC endpoint");
            let probe = self
                .connector
                .connect(endpoint)
                .and_then(|ledger| ledger.latest_blockhash().map(|_| ledger));
            match probe {
                Ok(ledger) => {
                    info!(endpoint, "connected");
                    return Ok(Connection {
                        endpoint: endpoint.clone(),
                        ledger,
                    });
                }
                Err(err) => warn!(endpoint, %err, "RPC endpoint failed the liveness probe"),
            }
        }
        Err(CapsuleClientError::NoEndpointAvailable {
            attempted: self.endpoints.len(),
        })
    }
}
