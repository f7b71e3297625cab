use std::{fs, path::Path};

use solana_program::{hash::Hash, pubkey::Pubkey};
use solana_sdk::{
    signature::{Keypair, Signer},
    transaction::Transaction,
};

use crate::error::{CapsuleClientError, Result};

/// A wallet able to sign on behalf of one account. Signing may be declined
/// (a user rejecting a prompt); that surfaces as
/// [`CapsuleClientError::SigningDeclined`] and is never retried.
pub trait WalletSigner {
    fn pubkey(&self) -> Pubkey;

    fn sign_transaction(&self, transaction: &mut Transaction, blockhash: Hash) -> Result<()>;

    fn sign_all_transactions(
        &self,
        transactions: &mut [Transaction],
        blockhash: Hash,
    ) -> Result<()> {
        for transaction in transactions {
            self.sign_transaction(transaction, blockhash)?;
        }
        Ok(())
    }
}

impl WalletSigner for Keypair {
    fn pubkey(&self) -> Pubkey {
        Signer::pubkey(self)
    }

    fn sign_transaction(&self, transaction: &mut Transaction, blockhash: Hash) -> Result<()> {
        transaction
            .try_sign(&[self], blockhash)
            .map_err(|err| CapsuleClientError::SigningDeclined(err.to_string()))
    }
}

impl<T: WalletSigner + ?Sized> WalletSigner for &T {
    fn pubkey(&self) -> Pubkey {
        (**self).pubkey()
    }

    fn sign_transaction(&self, transaction: &mut Transaction, blockhash: Hash) -> Result<()> {
        (**self).sign_transaction(transaction, blockhash)
    }
}

/// Reads a keypair in the Solana CLI format: a JSON array of the 64 secret
/// key bytes
pub fn read_keypair(path: &Path) -> Result<Keypair> {
    let raw = fs::read_to_string(path)
        .map_err(|err| CapsuleClientError::InvalidConfig(format!("{}: {err}", path.display())))?;
    keypair_from_json(&raw)
        .map_err(|err| CapsuleClientError::InvalidConfig(format!("{}: {err}", path.display())))
}

fn keypair_from_json(raw: &str) -> std::result::Result<Keypair, String> {
    let secret: Vec<u8> = serde_json::from_str(raw).map_err(|err| err.to_string())?;
    Keypair::from_bytes(&secret).map_err(|err| err.to_string())
}
