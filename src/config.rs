//! Bot configuration
//!
//! Loads `config.yml` (optional) and applies environment overrides. Values of
//! the form `${VAR}` in the YAML are resolved from the environment, and a
//! `.env` file is loaded first for local development.

use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::cadence::{
    CadencePolicy, DEFAULT_FIRST_CONTACT_DELAY_SECS, DEFAULT_FOLLOWUP_INTERVAL_SECS,
    DEFAULT_MAX_NOTICES,
};
use crate::gateway::ChannelId;
use crate::store::StorePaths;
use crate::templates::{
    load_template_text, LinkButton, TemplateKind, TemplateSet, TextFormat,
    DEFAULT_FALLBACK_NAME,
};
use crate::{Error, Result};

/// Default constants (fallback if config.yml not found)
pub const CONFIG_FILE: &str = "config.yml";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_FIRST_PASS_DELAY_SECS: u64 = 10;
pub const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_PORT: u16 = 10_000;
pub const WEBHOOK_PATH: &str = "/telegram";

const DEFAULT_WELCOME_BUTTON: &str = "👨‍💼 Admin";
const DEFAULT_REJOIN_BUTTON: &str = "✅ Join Channel Now";

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    telegram: Option<TelegramConfig>,
    store: Option<StoreConfig>,
    retention: Option<RetentionConfig>,
    links: Option<LinksConfig>,
    messages: Option<MessagesConfig>,
    transport: Option<TransportConfig>,
    server: Option<ServerConfig>,
    keepalive: Option<KeepaliveConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramConfig {
    bot_token: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    channel_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StoreConfig {
    dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RetentionConfig {
    poll_interval_secs: Option<u64>,
    first_pass_delay_secs: Option<u64>,
    first_contact_delay_secs: Option<u64>,
    followup_interval_secs: Option<u64>,
    max_notices: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LinksConfig {
    admin_url: Option<String>,
    rejoin_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesConfig {
    fallback_name: Option<String>,
    welcome: Option<TemplateConfig>,
    reengagement: Option<TemplateConfig>,
    farewell: Option<TemplateConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct TemplateConfig {
    text: Option<String>,
    /// File name inside the templates directory.
    text_file: Option<String>,
    photo: Option<String>,
    parse_mode: Option<String>,
    button: Option<ButtonConfig>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ButtonConfig {
    text: String,
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct TransportConfig {
    mode: Option<String>,
    webhook_url: Option<String>,
    listen_addr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerConfig {
    health_addr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct KeepaliveConfig {
    url: Option<String>,
    interval_secs: Option<u64>,
}

/// Deserialize a value that can be either a string or a number
fn deserialize_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number, got {:?}",
            other
        ))),
    }
}

/// How updates reach the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMode {
    /// Long polling `getUpdates`.
    Polling,
    /// Telegram pushes updates to `url`; the listener binds `listen_addr`.
    Webhook { url: String, listen_addr: SocketAddr },
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionSettings {
    pub poll_interval_secs: u64,
    pub first_pass_delay_secs: u64,
    pub policy: CadencePolicy,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            first_pass_delay_secs: DEFAULT_FIRST_PASS_DELAY_SECS,
            policy: CadencePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveSettings {
    pub url: String,
    pub interval_secs: u64,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub channel_id: ChannelId,
    pub store: StorePaths,
    pub retention: RetentionSettings,
    pub templates: TemplateSet,
    pub fallback_name: String,
    pub farewell_enabled: bool,
    pub transport: TransportMode,
    pub health_addr: Option<SocketAddr>,
    pub keepalive: Option<KeepaliveSettings>,
}

impl Config {
    /// Load configuration from `path`, or from `config.yml` in the current or
    /// parent directory when no path is given. A missing default file is not
    /// an error: environment variables alone can configure the bot.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_dotenv();

        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let candidates = [PathBuf::from(CONFIG_FILE), Path::new("..").join(CONFIG_FILE)];
                match candidates.iter().find(|p| p.exists()) {
                    Some(found) => Self::load_from_file(found)?,
                    None => Self::from_yaml(YamlConfig::default())?,
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Parse a specific file without validating required values.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let yaml: YamlConfig = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        Self::from_yaml(yaml)
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, env_key: &str) -> String {
        if let Some(ref v) = value {
            if let Some(var_name) = placeholder_name(v) {
                if let Ok(env_val) = std::env::var(var_name) {
                    return env_val;
                }
            }
        }
        if let Ok(env_val) = std::env::var(env_key) {
            return env_val;
        }
        match value {
            Some(v) if placeholder_name(&v).is_some() => String::new(),
            Some(v) => v,
            None => String::new(),
        }
    }

    /// Resolve an i64 value from string config or env var
    fn resolve_env_i64(value: Option<String>, env_key: &str) -> i64 {
        if let Some(ref v) = value {
            if let Some(var_name) = placeholder_name(v) {
                if let Ok(env_val) = std::env::var(var_name) {
                    if let Ok(parsed) = env_val.trim().parse::<i64>() {
                        return parsed;
                    }
                }
            }
            if let Ok(parsed) = v.trim().parse::<i64>() {
                return parsed;
            }
        }
        if let Ok(env_val) = std::env::var(env_key) {
            if let Ok(parsed) = env_val.trim().parse::<i64>() {
                return parsed;
            }
        }
        0
    }

    /// Resolve an optional string that only comes from YAML (`${VAR}` allowed)
    /// or an env override.
    fn resolve_optional(value: Option<String>, env_key: &str) -> Option<String> {
        let resolved = Self::resolve_env_string(value, env_key);
        if resolved.trim().is_empty() {
            None
        } else {
            Some(resolved)
        }
    }

    fn from_yaml(yaml: YamlConfig) -> Result<Self> {
        let telegram = yaml.telegram.unwrap_or_default();
        let store = yaml.store.unwrap_or_default();
        let retention = yaml.retention.unwrap_or_default();
        let links = yaml.links.unwrap_or_default();
        let messages = yaml.messages.unwrap_or_default();
        let transport = yaml.transport.unwrap_or_default();
        let server = yaml.server.unwrap_or_default();
        let keepalive = yaml.keepalive.unwrap_or_default();

        let bot_token = Self::resolve_env_string(telegram.bot_token, "BOT_TOKEN");
        let channel_id = Self::resolve_env_i64(telegram.channel_id, "CHANNEL_ID");

        let retention = RetentionSettings {
            poll_interval_secs: retention
                .poll_interval_secs
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
                .max(1),
            first_pass_delay_secs: retention
                .first_pass_delay_secs
                .unwrap_or(DEFAULT_FIRST_PASS_DELAY_SECS),
            policy: CadencePolicy {
                first_contact_delay_secs: retention
                    .first_contact_delay_secs
                    .unwrap_or(DEFAULT_FIRST_CONTACT_DELAY_SECS),
                followup_interval_secs: retention
                    .followup_interval_secs
                    .unwrap_or(DEFAULT_FOLLOWUP_INTERVAL_SECS),
                max_notices: retention.max_notices.unwrap_or(DEFAULT_MAX_NOTICES),
            },
        };

        let admin_url = Self::resolve_optional(links.admin_url, "ADMIN_URL");
        let rejoin_url = Self::resolve_optional(links.rejoin_url, "REJOIN_URL");

        let mut templates = TemplateSet::default();
        if let Some(url) = admin_url {
            templates.welcome.button = Some(LinkButton::new(DEFAULT_WELCOME_BUTTON, url));
        }
        if let Some(url) = rejoin_url {
            let button = LinkButton::new(DEFAULT_REJOIN_BUTTON, url);
            templates.reengagement.button = Some(button.clone());
            templates.farewell.button = Some(button);
        }

        let farewell_enabled = messages
            .farewell
            .as_ref()
            .and_then(|t| t.enabled)
            .unwrap_or(true);

        for (kind, overrides) in [
            (TemplateKind::Welcome, messages.welcome),
            (TemplateKind::Reengagement, messages.reengagement),
            (TemplateKind::Farewell, messages.farewell),
        ] {
            if let Some(overrides) = overrides {
                apply_template_overrides(&mut templates, kind, overrides)?;
            }
        }

        let transport = Self::resolve_transport(transport)?;

        let health_addr = Self::resolve_optional(server.health_addr, "HEALTH_ADDR")
            .map(|addr| parse_addr(&addr))
            .transpose()?;

        let keepalive = Self::resolve_optional(keepalive.url, "KEEPALIVE_URL").map(|url| {
            KeepaliveSettings {
                url,
                interval_secs: keepalive
                    .interval_secs
                    .unwrap_or(DEFAULT_KEEPALIVE_INTERVAL_SECS)
                    .max(1),
            }
        });

        Ok(Self {
            bot_token,
            channel_id,
            store: StorePaths::in_dir(store.dir.unwrap_or_else(|| PathBuf::from("."))),
            retention,
            templates,
            fallback_name: messages
                .fallback_name
                .unwrap_or_else(|| DEFAULT_FALLBACK_NAME.to_string()),
            farewell_enabled,
            transport,
            health_addr,
            keepalive,
        })
    }

    fn resolve_transport(transport: TransportConfig) -> Result<TransportMode> {
        let webhook_url = Self::resolve_optional(transport.webhook_url, "WEBHOOK_URL");
        let mode = transport.mode.map(|m| m.to_lowercase());

        match (mode.as_deref(), webhook_url) {
            (Some("polling"), _) | (None, None) => Ok(TransportMode::Polling),
            (Some("webhook"), None) => Err(Error::Config(
                "transport.mode is webhook but no webhook_url / WEBHOOK_URL is set".to_string(),
            )),
            (Some("webhook"), Some(url)) | (None, Some(url)) => {
                let listen_addr = match transport.listen_addr {
                    Some(addr) => parse_addr(&addr)?,
                    None => {
                        let port = std::env::var("PORT")
                            .ok()
                            .and_then(|p| p.trim().parse::<u16>().ok())
                            .unwrap_or(DEFAULT_PORT);
                        SocketAddr::from(([0, 0, 0, 0], port))
                    }
                };
                Ok(TransportMode::Webhook {
                    url: webhook_endpoint(&url),
                    listen_addr,
                })
            }
            (Some(other), _) => Err(Error::Config(format!(
                "Unknown transport mode: {}",
                other
            ))),
        }
    }

    /// Configuration errors that must stop the process at startup.
    pub fn validate(&self) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            return Err(Error::Config(
                "BOT_TOKEN is not set (telegram.bot_token or env)".to_string(),
            ));
        }
        if self.channel_id == 0 {
            return Err(Error::Config(
                "CHANNEL_ID is not set (telegram.channel_id or env)".to_string(),
            ));
        }
        Ok(())
    }
}

fn placeholder_name(value: &str) -> Option<&str> {
    value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
}

fn parse_addr(addr: &str) -> Result<SocketAddr> {
    addr.trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid socket address {}: {}", addr, e)))
}

/// Append the webhook path unless the URL already carries one.
fn webhook_endpoint(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with(WEBHOOK_PATH) {
        trimmed.to_string()
    } else {
        format!("{}{}", trimmed, WEBHOOK_PATH)
    }
}

fn apply_template_overrides(
    templates: &mut TemplateSet,
    kind: TemplateKind,
    overrides: TemplateConfig,
) -> Result<()> {
    let template = templates.get_mut(kind);

    if let Some(file) = overrides.text_file {
        template.text = load_template_text(&file)?;
    } else if let Some(text) = overrides.text {
        template.text = text;
    }
    if let Some(photo) = overrides.photo {
        template.photo = Some(photo);
    }
    if let Some(mode) = overrides.parse_mode {
        template.format = TextFormat::parse(&mode).ok_or_else(|| {
            Error::Config(format!("Unknown parse_mode for {}: {}", kind.label(), mode))
        })?;
    }
    if let Some(button) = overrides.button {
        template.button = Some(LinkButton::new(button.text, button.url));
    }
    Ok(())
}
