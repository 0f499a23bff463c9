//! wgprov - WireGuard interface provisioning
//!
//! Async library behind the `wgprovd` daemon:
//! - Key pair generation through the `wg` tool
//! - Interface config rendering
//! - Installation of keys and configs into the WireGuard config directory
//! - Interface status queries
//! - HTTP control API
//!
//! Every external command runs through [`tool::ToolRunner`].

pub mod error;
pub mod validation;
pub mod config;
pub mod tool;
pub mod keygen;
pub mod render;
pub mod installer;
pub mod provision;
pub mod status;
pub mod api;

// Re-export commonly used types
pub use error::{
    ConfigError, GenerationError, InstallError, ProvisioningError, QueryError, RenderError,
    ToolError, ValidationError, WgprovError, WgprovResult,
};
pub use config::WgprovConfig;
pub use tool::{ProcessRunner, ToolCommand, ToolOutput, ToolRunner};
pub use keygen::{KeyGenerator, KeyMaterial, KeyPairBackend, WgKeyTool};
pub use render::{ConfigRenderer, InterfaceOptions, InterfaceProfile, LifecycleHooks, TableMode};
pub use installer::{
    AppliedArtifact, ArtifactKind, InstallStage, InstalledArtifacts, Installer, RollbackReport,
};
pub use provision::{ProvisionedInterface, Provisioner, ProvisioningRequest};
pub use status::{ShowField, StatusBackend, StatusQuery, WgStatusTool};
pub use api::{router, AppState};
