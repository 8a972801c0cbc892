//! Node configuration
//!
//! A config can be deserialized (camelCase keys) or read from `GATEWAY_*`
//! environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::error::GatewayError;
use crate::protocol::GatewayRole;
use crate::Result;

pub const DEFAULT_PORT: u16 = 18789;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_AGENT_COUNT: u32 = 8;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub role: GatewayRole,
    pub gateway_id: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Main only. Defaults to `port + 1`.
    #[serde(default)]
    pub management_port: Option<u16>,
    /// Auxiliary only, e.g. `ws://10.0.0.1:18790`
    #[serde(default)]
    pub main_gateway_url: Option<String>,
    /// Auxiliary only. Sent as a bearer token; main does not verify it.
    #[serde(default)]
    pub main_gateway_token: Option<String>,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
    /// Main only. Empty allows every address.
    #[serde(default, rename = "allowedGatewayIPs")]
    pub allowed_gateway_ips: Vec<String>,
    /// Host advertised in the registration info
    #[serde(default = "default_advertised_host")]
    pub advertised_host: String,
    #[serde(default = "default_agent_count")]
    pub agent_count: u32,
    #[serde(default = "default_heartbeat_interval", with = "secs")]
    pub heartbeat_interval: Duration,
    #[serde(default = "default_reconnect_delay", with = "secs")]
    pub reconnect_delay: Duration,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_advertised_host() -> String {
    "localhost".to_string()
}

fn default_agent_count() -> u32 {
    DEFAULT_AGENT_COUNT
}

fn default_heartbeat_interval() -> Duration {
    DEFAULT_HEARTBEAT_INTERVAL
}

fn default_reconnect_delay() -> Duration {
    DEFAULT_RECONNECT_DELAY
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

impl GatewayConfig {
    fn with_role(role: GatewayRole, gateway_id: impl Into<String>) -> Self {
        Self {
            role,
            gateway_id: gateway_id.into(),
            port: DEFAULT_PORT,
            management_port: None,
            main_gateway_url: None,
            main_gateway_token: None,
            device_fingerprint: None,
            allowed_gateway_ips: Vec::new(),
            advertised_host: default_advertised_host(),
            agent_count: DEFAULT_AGENT_COUNT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Main gateway config with default ports (18789 / 18790)
    pub fn main(gateway_id: impl Into<String>) -> Self {
        Self::with_role(GatewayRole::Main, gateway_id)
    }

    pub fn auxiliary(gateway_id: impl Into<String>, main_gateway_url: impl Into<String>) -> Self {
        Self {
            main_gateway_url: Some(main_gateway_url.into()),
            ..Self::with_role(GatewayRole::Auxiliary, gateway_id)
        }
    }

    /// Port of the registration/heartbeat/dispatch channel
    pub fn management_port(&self) -> u16 {
        self.management_port
            .unwrap_or_else(|| self.port.saturating_add(1))
    }

    /// Check that the config can drive a runtime for its role
    pub fn validate(&self) -> Result<()> {
        if self.gateway_id.trim().is_empty() {
            return Err(GatewayError::Config("gatewayId must not be empty".to_string()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(GatewayError::Config(
                "heartbeatInterval must be positive".to_string(),
            ));
        }

        match self.role {
            GatewayRole::Main => Ok(()),
            GatewayRole::Auxiliary => match self.main_gateway_url.as_deref() {
                Some(url) if url.starts_with("ws://") || url.starts_with("wss://") => Ok(()),
                Some(url) => Err(GatewayError::Config(format!(
                    "mainGatewayUrl must be a ws:// or wss:// URL, got {}",
                    url
                ))),
                None => Err(GatewayError::Config(
                    "auxiliary gateway requires mainGatewayUrl".to_string(),
                )),
            },
            GatewayRole::Branch => Err(GatewayError::UnsupportedRole(GatewayRole::Branch)),
        }
    }

    /// Build a config from `GATEWAY_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let role = match var("GATEWAY_ROLE") {
            Some(raw) => GatewayRole::parse(&raw.to_ascii_lowercase())
                .ok_or_else(|| GatewayError::Config(format!("unknown GATEWAY_ROLE: {}", raw)))?,
            None => GatewayRole::Main,
        };
        let gateway_id = var("GATEWAY_ID").unwrap_or_else(|| match role {
            GatewayRole::Main => "gw-main-001".to_string(),
            _ => "gw-auxiliary-001".to_string(),
        });

        let mut config = Self::with_role(role, gateway_id);
        if let Some(port) = parse_var(&var, "GATEWAY_PORT")? {
            config.port = port;
        }
        config.management_port = parse_var(&var, "GATEWAY_MANAGEMENT_PORT")?;
        config.main_gateway_url = var("GATEWAY_MAIN_URL");
        config.main_gateway_token = var("GATEWAY_MAIN_TOKEN");
        config.device_fingerprint = var("GATEWAY_DEVICE_FINGERPRINT");
        config.allowed_gateway_ips = var("GATEWAY_ALLOWED_IPS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if let Some(host) = var("GATEWAY_ADVERTISED_HOST") {
            config.advertised_host = host;
        }
        if let Some(count) = parse_var(&var, "GATEWAY_AGENT_COUNT")? {
            config.agent_count = count;
        }
        if let Some(secs) = parse_var(&var, "GATEWAY_HEARTBEAT_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&var, "GATEWAY_RECONNECT_SECS")? {
            config.reconnect_delay = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match var(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| GatewayError::Config(format!("invalid {}: {}", name, raw))),
        None => Ok(None),
    }
}
