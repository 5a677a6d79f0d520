//! Local Key Signer - secp256k1 Key Held in Process
//!
//! The only output of onboarding consumed by the core: an address and the
//! ability to sign. The key is loaded from `WALLET_PRIVATE_KEY` (never from
//! the config file) and never logged.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::ports::signer::{HashSigner, SignerError};

/// Environment variable holding the hex private key.
pub const PRIVATE_KEY_ENV: &str = "WALLET_PRIVATE_KEY";

/// In-process signing key.
#[derive(Clone)]
pub struct LocalKeySigner {
    inner: PrivateKeySigner,
}

// Never print key material.
impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.inner.address())
            .finish_non_exhaustive()
    }
}

impl LocalKeySigner {
    /// Parse a hex private key (with or without `0x`).
    pub fn from_hex(key: &str) -> Result<Self> {
        let inner: PrivateKeySigner = key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .context("Invalid private key")?;
        Ok(Self { inner })
    }

    /// Load the key from `WALLET_PRIVATE_KEY`.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var(PRIVATE_KEY_ENV).with_context(|| format!("{PRIVATE_KEY_ENV} not set"))?;
        Self::from_hex(&key)
    }

    /// Fresh random key (tests and dry runs).
    pub fn random() -> Self {
        Self {
            inner: PrivateKeySigner::random(),
        }
    }

    /// Transaction-signing wallet for the EVM adapter.
    pub fn evm_wallet(&self) -> EthereumWallet {
        EthereumWallet::from(self.inner.clone())
    }
}

#[async_trait]
impl HashSigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_hash(&self, hash: &B256) -> Result<[u8; 65], SignerError> {
        self.inner
            .sign_hash_sync(hash)
            .map(|signature| signature.as_bytes())
            .map_err(|e| SignerError::Failed(e.to_string()))
    }
}
