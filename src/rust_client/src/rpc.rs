use solana_client::{client_error::ClientError, rpc_client::RpcClient};
use solana_program::{hash::Hash, pubkey::Pubkey};
use solana_sdk::{
    signature::Signature,
    transaction::{Transaction, TransactionError},
};

use crate::error::{CapsuleClientError, Result};

pub const LAMPORTS_PER_SOL: f64 = 1000000000.0;

/// Outcome of a processed transaction, as reported by the cluster
pub type TransactionStatus = std::result::Result<(), TransactionError>;

/// Failure to submit a transaction
#[derive(Debug)]
pub enum SubmitError {
    /// The cluster refused the transaction
    Rejected(TransactionError),
    /// The request never got an answer
    Rpc(CapsuleClientError),
}

impl SubmitError {
    /// Classifies the failure. `capsule` is the account a create targets,
    /// so a rejection for an occupied address reads as a collision.
    pub fn into_client_error(self, capsule: Option<Pubkey>) -> CapsuleClientError {
        match self {
            SubmitError::Rejected(err) => {
                CapsuleClientError::from_transaction_error(&err, capsule)
            }
            SubmitError::Rpc(err) => err,
        }
    }
}

/// The ledger operations the client needs. Every call is one blocking round
/// trip.
pub trait LedgerRpc {
    fn latest_blockhash(&self) -> Result<Hash>;

    fn is_blockhash_valid(&self, blockhash: &Hash) -> Result<bool>;

    /// Raw data of an account, `None` if the account does not exist
    fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>>;

    fn send_transaction(
        &self,
        transaction: &Transaction,
    ) -> std::result::Result<Signature, SubmitError>;

    /// `None` while the cluster has not processed the signature
    fn signature_status(&self, signature: &Signature) -> Result<Option<TransactionStatus>>;

    fn balance(&self, address: &Pubkey) -> Result<u64>;
}

fn rpc_error(err: ClientError) -> CapsuleClientError {
    let message = err.to_string();
    if message.contains("429") || message.to_lowercase().contains("too many requests") {
        CapsuleClientError::RateLimited(message)
    } else {
        CapsuleClientError::Connectivity(message)
    }
}

impl LedgerRpc for RpcClient {
    fn latest_blockhash(&self) -> Result<Hash> {
        self.get_latest_blockhash().map_err(rpc_error)
    }

    fn is_blockhash_valid(&self, blockhash: &Hash) -> Result<bool> {
        RpcClient::is_blockhash_valid(self, blockhash, self.commitment()).map_err(rpc_error)
    }

    fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        let response = self
            .get_account_with_commitment(address, self.commitment())
            .map_err(rpc_error)?;
        Ok(response.value.map(|account| account.data))
    }

    fn send_transaction(
        &self,
        transaction: &Transaction,
    ) -> std::result::Result<Signature, SubmitError> {
        RpcClient::send_transaction(self, transaction).map_err(|err| {
            match err.get_transaction_error() {
                Some(rejected) => SubmitError::Rejected(rejected),
                None => SubmitError::Rpc(rpc_error(err)),
            }
        })
    }

    fn signature_status(&self, signature: &Signature) -> Result<Option<TransactionStatus>> {
        self.get_signature_status(signature).map_err(rpc_error)
    }

    fn balance(&self, address: &Pubkey) -> Result<u64> {
        self.get_balance(address).map_err(rpc_error)
    }
}

impl<T: LedgerRpc + ?Sized> LedgerRpc for Box<T> {
    fn latest_blockhash(&self) -> Result<Hash> {
        (**self).latest_blockhash()
    }

    fn is_blockhash_valid(&self, blockhash: &Hash) -> Result<bool> {
        (**self).is_blockhash_valid(blockhash)
    }

    fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        (**self).account_data(address)
    }

    fn send_transaction(
        &self,
        transaction: &Transaction,
    ) -> std::result::Result<Signature, SubmitError> {
        (**self).send_transaction(transaction)
    }

    fn signature_status(&self, signature: &Signature) -> Result<Option<TransactionStatus>> {
        (**self).signature_status(signature)
    }

    fn balance(&self, address: &Pubkey) -> Result<u64> {
        (**self).balance(address)
    }
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL
}
