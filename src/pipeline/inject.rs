//! Signing seam and injection of signed operation groups

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey};
use std::sync::Arc;
use tracing::{error, instrument};

use super::errors::PipelineError;
use super::forge::ForgedOperation;
use crate::chain::ChainContext;
use crate::encoding::{decode_hex, Address, EncodingError, PublicKey, Signature};
use crate::metrics::{metrics, Timer};
use crate::structured_logging::PipelineLogger;

/// Signs the digest of a forged group
///
/// Key custody lives behind this trait; the pipeline only ever hands over
/// the 32-byte digest.
#[async_trait]
pub trait OperationSigner: Send + Sync {
    fn public_key(&self) -> PublicKey;

    async fn sign(&self, digest: &[u8]) -> Result<Signature, PipelineError>;

    fn address(&self) -> Address {
        self.public_key().address()
    }
}

/// In-process Ed25519 key, for tests and development
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn from_seed_hex(seed: &str) -> Result<Self, EncodingError> {
        let bytes = decode_hex(seed)?;
        let seed = <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| EncodingError::OutOfRange(format!("ed25519 seed of {} bytes", bytes.len())))?;
        Ok(Self::from_seed(seed))
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &self.public_key().to_string())
            .finish()
    }
}

#[async_trait]
impl OperationSigner for Ed25519Signer {
    fn public_key(&self) -> PublicKey {
        PublicKey::from_ed25519_bytes(self.key.verifying_key().to_bytes())
    }

    async fn sign(&self, digest: &[u8]) -> Result<Signature, PipelineError> {
        let signature = self.key.sign(digest);
        Signature::from_bytes(signature.to_bytes().to_vec()).map_err(|e| PipelineError::Signing(e.to_string()))
    }
}

#[derive(Clone)]
pub struct Injector {
    chain: Arc<ChainContext>,
    logger: PipelineLogger,
}

impl Injector {
    pub fn new(chain: Arc<ChainContext>) -> Self {
        Self {
            chain,
            logger: PipelineLogger::default(),
        }
    }

    pub fn with_logger(mut self, logger: PipelineLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Post `forged || signature` and return the operation hash
    #[instrument(skip_all)]
    pub async fn inject(&self, forged_hex: &str, signature_hex: &str) -> Result<String, PipelineError> {
        validate_hex("forged operation", forged_hex)?;
        validate_hex("signature", signature_hex)?;
        // 64 bytes for Ed25519, secp256k1 and P-256; 96 for BLS
        Signature::from_hex(signature_hex).map_err(|e| PipelineError::Signing(e.to_string()))?;

        let timer = Timer::new();
        let signed = format!("{}{}", forged_hex, signature_hex);
        match self.chain.inject_operation(&signed).await {
            Ok(hash) => {
                metrics().operations_injected.inc();
                self.logger.log_injected(&hash, timer.elapsed_ms());
                Ok(hash)
            }
            Err(e) => {
                metrics().injection_failures.inc();
                let err = PipelineError::rejected_at("injection", e);
                error!(error = %err, "Injection failed");
                self.logger.log_failure("inject", &err.to_string(), err.category());
                Err(err)
            }
        }
    }

    /// Sign the group's digest and inject it
    pub async fn sign_and_inject(
        &self,
        forged: &ForgedOperation,
        signer: &dyn OperationSigner,
    ) -> Result<String, PipelineError> {
        let digest = decode_hex(&forged.sign_hex)?;
        let signature = signer.sign(&digest).await?;
        let hash = self.inject(&forged.forged_hex, &signature.to_hex()).await?;
        self.chain.forget_account(&signer.address());
        Ok(hash)
    }
}

/// Non-empty lowercase hex of whole bytes
fn validate_hex(what: &str, value: &str) -> Result<(), PipelineError> {
    let valid = !value.is_empty()
        && value.len() % 2 == 0
        && value.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if valid {
        Ok(())
    } else {
        Err(EncodingError::Hex(format!("{} is not lowercase hex", what)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ed25519_signer_vector() {
        let signer = Ed25519Signer::from_seed([7u8; 32]);
        assert_eq!(
            signer.public_key().to_string(),
            "edpkvRQaXJ26ZAFi2ZNq5Hb5wXcc3S1Q8kVaXNjxXDfmtWEp9DkpFZ"
        );
        assert_eq!(signer.address().to_string(), "tz1Qr9uevaimfiPS6X1otehsKrwvZjX7bsyL");

        let digest = hex::decode("ee2f71f5b7aafe9191c028ebe2db680949a73742b11a7f856c951fa9ae4e31cf").unwrap();
        let signature = signer.sign(&digest).await.unwrap();
        assert_eq!(
            signature.to_hex(),
            "9382a18d22c9fac58ae94ec8e1962b1a48bf0d21044af8bf1364cf4115f1037578c08603fdded35911f2def15a436e69e41f727edb3f479ef4da9688985b6f0b"
        );
    }

    #[test]
    fn test_validate_hex() {
        assert!(validate_hex("x", "00ff").is_ok());
        assert!(validate_hex("x", "00FF").is_err());
        assert!(validate_hex("x", "0").is_err());
        assert!(validate_hex("x", "").is_err());
        assert!(validate_hex("x", "zz").is_err());
    }

    #[test]
    fn test_seed_hex_length_checked() {
        assert!(Ed25519Signer::from_seed_hex(&"07".repeat(32)).is_ok());
        assert!(Ed25519Signer::from_seed_hex("0707").is_err());
    }
}
