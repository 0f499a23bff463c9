//! Interface status queries (`wg show`, `wg showconf`)

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::error::{QueryError, ToolError, ValidationError};
use crate::tool::{ToolCommand, ToolRunner};
use crate::validation;

/// Source of `wg` query output
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusBackend: Send + Sync {
    /// Run `wg` with `args` and return its raw stdout
    async fn query(&self, args: &[String]) -> Result<Vec<u8>, ToolError>;
}

/// [`StatusBackend`] that runs the `wg` tool
pub struct WgStatusTool {
    runner: Arc<dyn ToolRunner>,
    wg: ToolCommand,
}

impl WgStatusTool {
    pub fn new(runner: Arc<dyn ToolRunner>, wg: ToolCommand) -> Self {
        Self { runner, wg }
    }
}

#[async_trait]
impl StatusBackend for WgStatusTool {
    async fn query(&self, args: &[String]) -> Result<Vec<u8>, ToolError> {
        Ok(self.runner.run(&self.wg, args, None).await?.stdout)
    }
}

/// Single field of `wg show <interface> <field>`
///
/// `private-key` is deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowField {
    PublicKey,
    ListenPort,
    Fwmark,
    Peers,
    PresharedKeys,
    Endpoints,
    AllowedIps,
    LatestHandshakes,
    PersistentKeepalive,
    Transfer,
}

impl ShowField {
    pub const ALL: [ShowField; 10] = [
        ShowField::PublicKey,
        ShowField::ListenPort,
        ShowField::Fwmark,
        ShowField::Peers,
        ShowField::PresharedKeys,
        ShowField::Endpoints,
        ShowField::AllowedIps,
        ShowField::LatestHandshakes,
        ShowField::PersistentKeepalive,
        ShowField::Transfer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ShowField::PublicKey => "public-key",
            ShowField::ListenPort => "listen-port",
            ShowField::Fwmark => "fwmark",
            ShowField::Peers => "peers",
            ShowField::PresharedKeys => "preshared-keys",
            ShowField::Endpoints => "endpoints",
            ShowField::AllowedIps => "allowed-ips",
            ShowField::LatestHandshakes => "latest-handshakes",
            ShowField::PersistentKeepalive => "persistent-keepalive",
            ShowField::Transfer => "transfer",
        }
    }
}

impl FromStr for ShowField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShowField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| {
                ValidationError::new(format!("Unsupported field '{}'", s.escape_debug()))
            })
    }
}

impl fmt::Display for ShowField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads interface status
#[derive(Clone)]
pub struct StatusQuery {
    backend: Arc<dyn StatusBackend>,
}

impl StatusQuery {
    pub fn new(backend: Arc<dyn StatusBackend>) -> Self {
        Self { backend }
    }

    async fn run(&self, args: Vec<String>) -> Result<String, QueryError> {
        let out = self.backend.query(&args).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Names of all WireGuard interfaces, as printed by `wg show interfaces`
    pub async fn list_interfaces(&self) -> Result<String, QueryError> {
        debug!("Listing interfaces");
        self.run(vec!["show".to_string(), "interfaces".to_string()]).await
    }

    /// Full `wg show <name>` output
    pub async fn show_interface(&self, name: &str) -> Result<String, QueryError> {
        validation::validate_interface_name(name)?;
        debug!("Showing interface {}", name);
        self.run(vec!["show".to_string(), name.to_string()]).await
    }

    /// `wg show <name> <field>`, with `field` restricted to [`ShowField`]
    pub async fn show_field(&self, name: &str, field: &str) -> Result<String, QueryError> {
        validation::validate_interface_name(name)?;
        let field = field.parse::<ShowField>().map_err(QueryError::InvalidField)?;
        debug!("Showing {} of interface {}", field, name);
        self.run(vec!["show".to_string(), name.to_string(), field.to_string()])
            .await
    }

    /// Running configuration as printed by `wg showconf <name>`
    ///
    /// The output includes the interface private key.
    pub async fn show_config(&self, name: &str) -> Result<String, QueryError> {
        validation::validate_interface_name(name)?;
        debug!("Dumping configuration of interface {}", name);
        self.run(vec!["showconf".to_string(), name.to_string()]).await
    }
}
