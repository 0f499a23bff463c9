//! WireGuard key pair generation
//!
//! Keys come from `wg genkey` / `wg pubkey` / `wg genpsk`; nothing here does any
//! cryptography itself. [`KeyPairBackend`] is the seam where an in-process
//! implementation can replace the external tool.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::GenerationError;
use crate::tool::{ToolCommand, ToolRunner};

/// Raw key bytes as produced by the tool (base64 text, newline-terminated)
pub type KeyBytes = Vec<u8>;

/// Which half of the key pair operation ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStep {
    Generate,
    Derive,
    Preshared,
}

impl KeyStep {
    pub fn stage(self) -> &'static str {
        match self {
            KeyStep::Generate => "key_generation",
            KeyStep::Derive => "key_derivation",
            KeyStep::Preshared => "psk_generation",
        }
    }
}

impl fmt::Display for KeyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStep::Generate => write!(f, "genkey"),
            KeyStep::Derive => write!(f, "pubkey"),
            KeyStep::Preshared => write!(f, "genpsk"),
        }
    }
}

/// Produces private keys and derives public keys from them
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyPairBackend: Send + Sync {
    /// Generate a new private key
    async fn generate(&self) -> Result<KeyBytes, GenerationError>;

    /// Derive the public key for `private_key`
    async fn derive(&self, private_key: &[u8]) -> Result<KeyBytes, GenerationError>;

    /// Generate a symmetric preshared key for a peer
    async fn preshared(&self) -> Result<KeyBytes, GenerationError>;
}

/// [`KeyPairBackend`] that shells out to `wg`
pub struct WgKeyTool {
    runner: Arc<dyn ToolRunner>,
    wg: ToolCommand,
}

impl WgKeyTool {
    pub fn new(runner: Arc<dyn ToolRunner>, wg: ToolCommand) -> Self {
        Self { runner, wg }
    }

    async fn invoke(&self, step: KeyStep, stdin: Option<Vec<u8>>) -> Result<KeyBytes, GenerationError> {
        let output = self
            .runner
            .run(&self.wg, &[step.to_string()], stdin)
            .await
            .map_err(|source| GenerationError::Tool { step, source })?;

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(GenerationError::EmptyOutput { step });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl KeyPairBackend for WgKeyTool {
    async fn generate(&self) -> Result<KeyBytes, GenerationError> {
        self.invoke(KeyStep::Generate, None).await
    }

    async fn derive(&self, private_key: &[u8]) -> Result<KeyBytes, GenerationError> {
        self.invoke(KeyStep::Derive, Some(private_key.to_vec())).await
    }

    async fn preshared(&self) -> Result<KeyBytes, GenerationError> {
        self.invoke(KeyStep::Preshared, None).await
    }
}

/// A private key and the public key derived from it
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub private_key: KeyBytes,
    pub public_key: KeyBytes,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("private_key", &"<redacted>")
            .field("public_key", &key_text(&self.public_key))
            .finish()
    }
}

/// Key bytes as a single trimmed line of text
pub fn key_text(key: &[u8]) -> String {
    String::from_utf8_lossy(key).trim().to_string()
}

/// Front end over a [`KeyPairBackend`]
#[derive(Clone)]
pub struct KeyGenerator {
    backend: Arc<dyn KeyPairBackend>,
}

impl KeyGenerator {
    pub fn new(backend: Arc<dyn KeyPairBackend>) -> Self {
        Self { backend }
    }

    pub async fn generate_private_key(&self) -> Result<KeyBytes, GenerationError> {
        debug!("Generating private key");
        self.backend.generate().await
    }

    pub async fn generate_public_key(&self, private_key: &[u8]) -> Result<KeyBytes, GenerationError> {
        debug!("Deriving public key");
        self.backend.derive(private_key).await
    }

    pub async fn generate_preshared_key(&self) -> Result<KeyBytes, GenerationError> {
        debug!("Generating preshared key");
        self.backend.preshared().await
    }

    /// Generate a private key and derive its public key
    pub async fn generate_key_pair(&self) -> Result<KeyMaterial, GenerationError> {
        let private_key = self.generate_private_key().await?;
        let public_key = self.generate_public_key(&private_key).await?;
        info!("Generated key pair (public key {})", key_text(&public_key));
        Ok(KeyMaterial {
            private_key,
            public_key,
        })
    }
}
