use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use chat_sync::connection::{ConnectionConfig, DEFAULT_HEARTBEAT_MS};
use chat_sync::stomp::HeartBeat;
use chat_sync::{Identity, SessionConfig, TokenSource};

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [broker]
//                    url = "wss://chat.example.com/ws"
//
//   env var:         CHAT_BROKER__URL=wss://...   (double underscore = nesting)
//
//   (single underscore stays within field names: CHAT_BROKER__RECONNECT_DELAY_MS)

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub broker: BrokerFileConfig,
    #[serde(default)]
    pub api: ApiFileConfig,
    #[serde(default)]
    pub identity: IdentityFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
}

/// Message broker (lives under `[broker]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerFileConfig {
    #[serde(default = "default_broker_url")]
    pub url: String,
    /// Virtual host sent in CONNECT. Defaults to the URL's host.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// 0 disables heartbeats.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for BrokerFileConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            host: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// REST collaborators (lives under `[api]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiFileConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ApiFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Who we are (lives under `[identity]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IdentityFileConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Credential source (lives under `[auth]`). `token_command` wins over
/// `token` when both are set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default)]
    pub token: Option<String>,
    /// Program and arguments printing a fresh bearer token on stdout.
    #[serde(default)]
    pub token_command: Option<Vec<String>>,
}

fn default_broker_url() -> String {
    "ws://localhost:8080/ws".to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}
fn default_heartbeat_ms() -> u64 {
    DEFAULT_HEARTBEAT_MS
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_request_timeout_ms() -> u64 {
    15_000
}

/// Build a figment that layers: defaults → config.toml → CHAT_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `CHAT_BROKER__URL=wss://...`  →  `broker.url = "wss://..."`
///   `CHAT_AUTH__TOKEN=...`  →  `auth.token = "..."`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("CHAT_").split("__"))
}

impl FileConfig {
    /// Copy safe to print: secrets replaced.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.auth.token.is_some() {
            copy.auth.token = Some("<redacted>".to_string());
        }
        copy
    }
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub broker_url: String,
    pub session: SessionConfig,
    pub credentials: TokenSource,
    /// Unset until configured or given with `--as`.
    pub identity: Option<Identity>,
}

impl ClientConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self> {
        let host = match &fc.broker.host {
            Some(host) => host.clone(),
            None => host_of(&fc.broker.url)
                .with_context(|| format!("Invalid broker url: {}", fc.broker.url))?,
        };

        let connection = ConnectionConfig {
            host,
            reconnect_delay: Duration::from_millis(fc.broker.reconnect_delay_ms),
            heart_beat: HeartBeat {
                outgoing_ms: fc.broker.heartbeat_ms,
                incoming_ms: fc.broker.heartbeat_ms,
            },
            connect_timeout: Duration::from_millis(fc.broker.connect_timeout_ms),
        };

        let identity = fc.identity.id.as_ref().map(|id| {
            let display_name = fc.identity.display_name.clone().unwrap_or_else(|| id.clone());
            Identity::new(id.clone(), display_name)
        });

        Ok(Self {
            broker_url: fc.broker.url.clone(),
            session: SessionConfig {
                connection,
                api_base_url: fc.api.base_url.clone(),
                request_timeout: Duration::from_millis(fc.api.request_timeout_ms),
            },
            credentials: token_source(&fc.auth)?,
            identity,
        })
    }

    pub fn identity(&self) -> Result<Identity> {
        self.identity
            .clone()
            .context("No identity configured: set [identity] id in config.toml, CHAT_IDENTITY__ID, or pass --as")
    }
}

fn token_source(auth: &AuthFileConfig) -> Result<TokenSource> {
    if let Some(command) = &auth.token_command {
        let Some((program, args)) = command.split_first() else {
            bail!("auth.token_command is empty");
        };
        return Ok(TokenSource::Command {
            program: program.clone(),
            args: args.to_vec(),
        });
    }
    match &auth.token {
        Some(token) => Ok(TokenSource::Static(token.clone())),
        None => bail!("No credential configured: set auth.token or auth.token_command"),
    }
}

/// `ws://host:port/path` → `host`.
fn host_of(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?']).next()?;
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = match host.strip_prefix('[') {
        Some(v6) => v6.split(']').next()?,
        None => host.split(':').next()?,
    };
    (!host.is_empty()).then(|| host.to_string())
}

// =============================================================================
// Directory layout (not tunable via figment; derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub data_dir: PathBuf,
}

impl ChatConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".chat"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        info!("Data directory: {}", data_dir.display());
        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn load(&self) -> Result<FileConfig> {
        load_config(&self.data_dir)
            .extract()
            .with_context(|| format!("Failed to load {}", self.config_toml_path().display()))
    }
}
