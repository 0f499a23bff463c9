//! HTTP control API
//!
//! Routes:
//! - `GET  /ping`
//! - `GET  /interfaces`
//! - `GET  /interfaces/{name}`
//! - `POST /interfaces/{name}`
//! - `GET  /interfaces/{name}/conf`
//! - `GET  /interfaces/{name}/fields/{field}`
//! - `GET  /utils/gen_key_pair`
//! - `GET  /utils/gen_psk`
//! - `POST /utils/pubkey`
//! - `GET  /utils/gen_ifc_cfg/{name}`

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{DefaultSettings, WgprovConfig};
use crate::error::{
    GenerationError, ProvisioningError, QueryError, RenderError, ValidationError, WgprovError,
};
use crate::installer::Installer;
use crate::keygen::{key_text, KeyGenerator, WgKeyTool};
use crate::provision::{ProvisionedInterface, Provisioner, ProvisioningRequest};
use crate::render::{
    compose_address, ConfigRenderer, InterfaceOptions, InterfaceProfile, LifecycleHooks, TableMode,
};
use crate::status::{StatusQuery, WgStatusTool};
use crate::tool::{ProcessRunner, ToolRunner};
use crate::validation;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    keys: KeyGenerator,
    renderer: Arc<ConfigRenderer>,
    provisioner: Arc<Provisioner>,
    status: StatusQuery,
    defaults: Arc<DefaultSettings>,
}

impl AppState {
    pub fn new(
        keys: KeyGenerator,
        renderer: Arc<ConfigRenderer>,
        provisioner: Arc<Provisioner>,
        status: StatusQuery,
        defaults: DefaultSettings,
    ) -> Self {
        Self {
            keys,
            renderer,
            provisioner,
            status,
            defaults: Arc::new(defaults),
        }
    }

    /// Wire up the real `wg`-backed components
    pub fn from_config(config: &WgprovConfig) -> Result<Self, RenderError> {
        let runner: Arc<dyn ToolRunner> = Arc::new(ProcessRunner::new(config.tools.timeout()));
        let keys = KeyGenerator::new(Arc::new(WgKeyTool::new(
            Arc::clone(&runner),
            config.tools.wg.clone(),
        )));
        let status = StatusQuery::new(Arc::new(WgStatusTool::new(
            Arc::clone(&runner),
            config.tools.wg.clone(),
        )));
        let renderer = Arc::new(ConfigRenderer::new()?);
        let installer = Installer::new(runner, &config.paths, &config.tools);
        let provisioner = Arc::new(Provisioner::new(keys.clone(), Arc::clone(&renderer), installer));

        Ok(Self::new(keys, renderer, provisioner, status, config.defaults.clone()))
    }

    pub fn keys(&self) -> &KeyGenerator {
        &self.keys
    }

    pub fn provisioner(&self) -> &Arc<Provisioner> {
        &self.provisioner
    }

    pub fn status(&self) -> &StatusQuery {
        &self.status
    }
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Wrapper for API errors to implement IntoResponse
pub struct ApiError(WgprovError);

impl From<WgprovError> for ApiError {
    fn from(err: WgprovError) -> Self {
        ApiError(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError(err.into())
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        ApiError(err.into())
    }
}

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        ApiError(err.into())
    }
}

impl From<ProvisioningError> for ApiError {
    fn from(err: ProvisioningError) -> Self {
        ApiError(err.into())
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError(err.into())
    }
}

fn error_details(err: &WgprovError) -> Option<serde_json::Value> {
    match err {
        WgprovError::Provisioning(ProvisioningError::Install(e)) => Some(serde_json::json!({
            "interface": e.interface,
            "artifact": e.kind,
            "installed": e.installed,
            "rollback": e.rollback.as_ref().map(|r| serde_json::json!({
                "removed": r.removed,
                "restored": r.restored,
                "failed": r.failed,
            })),
        })),
        _ => None,
    }
}

/// Convert WgprovError to HTTP response
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let stage = self.0.stage();
        let status = match &self.0 {
            WgprovError::Io(_)
            | WgprovError::Config(_)
            | WgprovError::Provisioning(ProvisioningError::Interrupted(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };

        if status.is_server_error() {
            error!("Request failed at {}: {:?}", stage, self.0);
        } else {
            warn!("Request failed at {}: {}", stage, self.0);
        }

        let body = ErrorResponse {
            error: self.0.to_string(),
            details: error_details(&self.0),
            stage,
        };
        (status, Json(body)).into_response()
    }
}

/// Optional interface settings accepted by the config endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ProfileParams {
    pub dns: Option<String>,
    pub table: Option<String>,
    #[serde(flatten)]
    pub hooks: LifecycleHooks,
}

impl ProfileParams {
    pub fn into_profile(self) -> Result<InterfaceProfile, ValidationError> {
        let table = match self.table {
            Some(table) => table.parse::<TableMode>()?,
            None => TableMode::Off,
        };
        Ok(InterfaceProfile {
            dns: self.dns,
            table,
            hooks: self.hooks,
        })
    }
}

/// Query string of `GET /utils/gen_ifc_cfg/{name}`
#[derive(Debug, Default, Deserialize)]
pub struct GenConfigParams {
    pub addr: Option<String>,
    pub mask: Option<String>,
    pub port: Option<String>,
    #[serde(flatten)]
    pub profile: ProfileParams,
}

/// Listen port given either as a JSON number or a string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(u64),
    Text(String),
}

impl PortValue {
    /// Text form handed to [`validation::parse_listen_port`]
    pub fn into_text(self) -> String {
        match self {
            PortValue::Number(port) => port.to_string(),
            PortValue::Text(port) => port,
        }
    }
}

/// Body of `POST /interfaces/{name}`
#[derive(Debug, Deserialize)]
pub struct ProvisionBody {
    /// Interface IP without prefix length
    pub addr: String,
    pub mask: Option<String>,
    pub port: Option<PortValue>,
    #[serde(flatten)]
    pub profile: ProfileParams,
}

/// Body of `POST /utils/pubkey`
#[derive(Debug, Deserialize)]
pub struct PublicKeyBody {
    /// Base64 private key
    pub key: String,
}

async fn ping() -> &'static str {
    "pong"
}

async fn list_interfaces(State(state): State<AppState>) -> Result<String, ApiError> {
    Ok(state.status.list_interfaces().await?)
}

async fn show_interface(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<String, ApiError> {
    Ok(state.status.show_interface(&name).await?)
}

async fn show_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<String, ApiError> {
    Ok(state.status.show_config(&name).await?)
}

async fn show_field(
    State(state): State<AppState>,
    Path((name, field)): Path<(String, String)>,
) -> Result<String, ApiError> {
    Ok(state.status.show_field(&name, &field).await?)
}

async fn provision_interface(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ProvisionBody>,
) -> Result<Json<ProvisionedInterface>, ApiError> {
    let request = ProvisioningRequest {
        name,
        address: body.addr,
        mask: body.mask.unwrap_or_else(|| state.defaults.mask.clone()),
        listen_port: match body.port {
            Some(port) => port.into_text(),
            None => state.defaults.listen_port.to_string(),
        },
        profile: body.profile.into_profile()?,
    };

    // Detached so a dropped connection cannot leave a half-finished install
    let provisioned = state.provisioner.provision_detached(request).await?;
    info!("Provisioned {} via API", provisioned.name);
    Ok(Json(provisioned))
}

async fn gen_key_pair(State(state): State<AppState>) -> Result<String, ApiError> {
    let pair = state.keys.generate_key_pair().await?;
    Ok(format!(
        "private key: {}\npublic key: {}\n",
        key_text(&pair.private_key),
        key_text(&pair.public_key)
    ))
}

async fn gen_psk(State(state): State<AppState>) -> Result<String, ApiError> {
    let psk = state.keys.generate_preshared_key().await?;
    Ok(format!("preshared key: {}\n", key_text(&psk)))
}

async fn derive_public_key(
    State(state): State<AppState>,
    Json(body): Json<PublicKeyBody>,
) -> Result<String, ApiError> {
    let private_key = body.key.trim();
    validation::validate_config_value(private_key)?;
    let public_key = state
        .keys
        .generate_public_key(format!("{}\n", private_key).as_bytes())
        .await?;
    Ok(format!("public key: {}\n", key_text(&public_key)))
}

async fn gen_ifc_cfg(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<GenConfigParams>,
) -> Result<String, ApiError> {
    validation::validate_interface_name(&name)?;
    let port = match params.port {
        Some(port) => validation::parse_listen_port(&port)?,
        None => state.defaults.listen_port,
    };
    let addr = params.addr.unwrap_or_else(|| state.defaults.address.clone());
    let mask = params.mask.unwrap_or_else(|| state.defaults.mask.clone());
    let profile = params.profile.into_profile()?;

    let private_key = state.keys.generate_private_key().await?;
    let options = InterfaceOptions::new(compose_address(&addr, &mask), port, key_text(&private_key))
        .with_profile(profile);
    Ok(state.renderer.render(&options)?)
}

/// Build the control API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/interfaces", get(list_interfaces))
        .route("/interfaces/{name}", get(show_interface).post(provision_interface))
        .route("/interfaces/{name}/conf", get(show_config))
        .route("/interfaces/{name}/fields/{field}", get(show_field))
        .route("/utils/gen_key_pair", get(gen_key_pair))
        .route("/utils/gen_psk", get(gen_psk))
        .route("/utils/pubkey", post(derive_public_key))
        .route("/utils/gen_ifc_cfg/{name}", get(gen_ifc_cfg))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
