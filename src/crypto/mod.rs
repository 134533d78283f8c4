use crate::types::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("key error: {0}")]
    Key(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct PublicKeyBytes(pub Vec<u8>);

impl PublicKeyBytes {
    /// Address derived from this key: first 20 bytes of blake3(pk).
    pub fn address(&self) -> Address {
        let h = blake3::hash(&self.0);
        let mut out = [0u8; 20];
        out.copy_from_slice(&h.as_bytes()[..20]);
        Address(out)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        hex::decode(s.trim_start_matches("0x"))
            .map(Self)
            .map_err(|e| CryptoError::Key(format!("bad pk hex: {e}")))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBytes(pub Vec<u8>);

pub trait Signer: Send + Sync {
    fn public_key(&self) -> PublicKeyBytes;
    fn sign(&self, msg: &[u8]) -> SignatureBytes;

    fn address(&self) -> Address {
        self.public_key().address()
    }
}

pub trait Verifier: Send + Sync {
    fn verify(pk: &PublicKeyBytes, msg: &[u8], sig: &SignatureBytes) -> Result<(), CryptoError>;
}

pub mod ed25519;

pub mod tx;
