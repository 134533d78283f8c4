use super::{CryptoError, PublicKeyBytes, SignatureBytes, Signer, Verifier};
use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey, Verifier as DalekVerifier, VerifyingKey};
use rand::rngs::OsRng;

#[derive(Clone)]
pub struct Ed25519Keypair {
    sk: SigningKey,
}

impl Ed25519Keypair {
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self { sk: SigningKey::generate(&mut rng) }
    }

    pub fn from_seed(seed32: [u8; 32]) -> Self {
        Self { sk: SigningKey::from_bytes(&seed32) }
    }

    /// Deterministic key from a human label (devnets and tests only).
    pub fn from_label(label: &str) -> Self {
        let mut h = blake3::Hasher::new();
        h.update(b"UNICRIUM_DEV_KEY");
        h.update(label.as_bytes());
        Self::from_seed(*h.finalize().as_bytes())
    }

    /// Parse a 32-byte hex seed.
    pub fn from_seed_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| CryptoError::Key(format!("bad seed hex: {e}")))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::Key("seed must be 32 bytes".into()))?;
        Ok(Self::from_seed(seed))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.sk.to_bytes()
    }
}

impl std::fmt::Debug for Ed25519Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Keypair")
            .field("address", &self.address().to_hex())
            .finish()
    }
}

impl Signer for Ed25519Keypair {
    fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes(self.sk.verifying_key().to_bytes().to_vec())
    }

    fn sign(&self, msg: &[u8]) -> SignatureBytes {
        let sig: Signature = self.sk.sign(msg);
        SignatureBytes(sig.to_bytes().to_vec())
    }
}

pub struct Ed25519Verifier;

impl Verifier for Ed25519Verifier {
    fn verify(pk: &PublicKeyBytes, msg: &[u8], sig: &SignatureBytes) -> Result<(), CryptoError> {
        let vk = VerifyingKey::from_bytes(
            pk.0.as_slice()
                .try_into()
                .map_err(|_| CryptoError::Key("bad pk bytes".into()))?,
        )
        .map_err(|e| CryptoError::Key(format!("{e}")))?;

        let sig = Signature::from_bytes(
            sig.0.as_slice()
                .try_into()
                .map_err(|_| CryptoError::Key("bad sig bytes".into()))?,
        );
        // verify_strict rejects small-order keys and malleable signatures
        vk.verify_strict(msg, &sig).map_err(|_| CryptoError::InvalidSignature)
    }
}

/// Convenience wrapper used throughout the crate.
pub fn verify(pk: &PublicKeyBytes, msg: &[u8], sig: &SignatureBytes) -> Result<(), CryptoError> {
    Ed25519Verifier::verify(pk, msg, sig)
}
