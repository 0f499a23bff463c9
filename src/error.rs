//! Error types for wgprov

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::installer::{ArtifactKind, InstallStage, RollbackReport};
use crate::keygen::KeyStep;

/// Rejected user input (interface names, ports, addresses, config values)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Failure of an external tool invocation
#[derive(Debug, Error)]
pub enum ToolError {
    /// The configured command has no program
    #[error("Tool command is empty")]
    EmptyCommand,
    /// Process could not be launched or its pipes could not be set up
    #[error("Failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    /// Writing to the child's stdin failed
    #[error("Failed to write stdin of '{command}': {source}")]
    Stdin {
        command: String,
        #[source]
        source: io::Error,
    },
    /// Process exited unsuccessfully
    #[error("Command '{command}' failed{}: {stderr}", exit_suffix(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    /// Process did not finish in time and was killed
    #[error("Command '{command}' timed out after {}s", .timeout.as_secs_f64())]
    TimedOut { command: String, timeout: Duration },
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with code {}", code),
        None => " (terminated by signal)".to_string(),
    }
}

/// Key generation or derivation failed
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("wg {step} failed: {source}")]
    Tool {
        step: KeyStep,
        #[source]
        source: ToolError,
    },
    #[error("wg {step} produced no key")]
    EmptyOutput { step: KeyStep },
}

impl GenerationError {
    pub fn step(&self) -> KeyStep {
        match self {
            GenerationError::Tool { step, .. } | GenerationError::EmptyOutput { step } => *step,
        }
    }
}

/// Interface config rendering failed
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),
}

/// Underlying cause of an [`InstallError`]
#[derive(Debug, Error)]
pub enum InstallCause {
    #[error("{0}")]
    InvalidName(#[from] ValidationError),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Tool(#[from] ToolError),
}

/// Installing one artifact failed
///
/// `installed` lists the artifacts this call had already placed in the
/// install directory, and `rollback` reports the compensating cleanup that
/// [`crate::installer::Installer::full_install`] ran: artifacts that
/// replaced an earlier install are restored from backup, new ones removed.
#[derive(Debug, Error)]
#[error("Failed to install {kind} for '{interface}' during {stage}: {cause}")]
pub struct InstallError {
    pub interface: String,
    pub kind: ArtifactKind,
    pub stage: InstallStage,
    #[source]
    pub cause: InstallCause,
    pub installed: Vec<ArtifactKind>,
    pub rollback: Option<RollbackReport>,
}

impl InstallError {
    pub(crate) fn new(
        interface: &str,
        kind: ArtifactKind,
        stage: InstallStage,
        cause: impl Into<InstallCause>,
    ) -> Self {
        Self {
            interface: interface.to_string(),
            kind,
            stage,
            cause: cause.into(),
            installed: Vec::new(),
            rollback: None,
        }
    }

    /// True when the install directory is back to its state before the call
    pub fn is_clean(&self) -> bool {
        match &self.rollback {
            Some(report) => report.failed.is_empty(),
            None => self.installed.is_empty(),
        }
    }
}

/// Provisioning workflow failure, tagged by the step that failed
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("Invalid interface name: {0}")]
    InvalidName(#[source] ValidationError),
    #[error("Invalid listen port: {0}")]
    InvalidPort(#[source] ValidationError),
    #[error("Invalid interface address: {0}")]
    InvalidAddress(#[source] ValidationError),
    #[error("Private key generation failed: {0}")]
    KeyGeneration(#[source] GenerationError),
    #[error("Public key derivation failed: {0}")]
    KeyDerivation(#[source] GenerationError),
    #[error("Rendering interface config failed: {0}")]
    Render(#[from] RenderError),
    #[error("{0}")]
    Install(#[from] InstallError),
    #[error("Provisioning task did not complete: {0}")]
    Interrupted(#[source] tokio::task::JoinError),
}

/// Interface status query failed
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid interface name: {0}")]
    InvalidName(#[from] ValidationError),
    #[error("Invalid field: {0}")]
    InvalidField(#[source] ValidationError),
    #[error("wg query failed: {0}")]
    Tool(#[from] ToolError),
}

/// Configuration file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Crate-wide error
#[derive(Debug, Error)]
pub enum WgprovError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(#[from] ValidationError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl WgprovError {
    /// Short machine-readable name of the stage that failed
    pub fn stage(&self) -> String {
        match self {
            WgprovError::InvalidParameter(_) => "validation".to_string(),
            WgprovError::Generation(e) => e.step().stage().to_string(),
            WgprovError::Render(_) => "render".to_string(),
            WgprovError::Query(QueryError::InvalidName(_) | QueryError::InvalidField(_)) => {
                "validation".to_string()
            }
            WgprovError::Query(QueryError::Tool(_)) => "query".to_string(),
            WgprovError::Provisioning(e) => match e {
                ProvisioningError::InvalidName(_)
                | ProvisioningError::InvalidPort(_)
                | ProvisioningError::InvalidAddress(_) => "validation".to_string(),
                ProvisioningError::KeyGeneration(_) => KeyStep::Generate.stage().to_string(),
                ProvisioningError::KeyDerivation(_) => KeyStep::Derive.stage().to_string(),
                ProvisioningError::Render(_) => "render".to_string(),
                ProvisioningError::Install(e) => {
                    format!("install:{}:{}", e.kind.label(), e.stage.label())
                }
                ProvisioningError::Interrupted(_) => "provision".to_string(),
            },
            WgprovError::Config(_) => "config".to_string(),
            WgprovError::Io(_) => "io".to_string(),
        }
    }
}

pub type WgprovResult<T> = Result<T, WgprovError>;
