//! Client for the Time Capsule program: finds a live RPC endpoint, derives
//! capsule addresses, decodes capsule accounts and drives the create,
//! discover and unlock flows, including the cross-chain notification
//! attached to an unlock.

pub mod address;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod rpc;
pub mod wallet;

pub use crate::{
    address::{AddressDeriver, AddressScheme},
    config::ClientConfig,
    decoder::{decode_capsule, extract_capsule_data, DecodedCapsule},
    dispatch::{DispatchCoordinator, DispatchTarget},
    endpoint::{Connector, EndpointResolver},
    error::{CapsuleClientError, ErrorKind, Result},
    registry::CapsuleRegistryClient,
    rpc::LedgerRpc,
    wallet::WalletSigner,
};
