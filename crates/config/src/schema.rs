//! Config schema: one entry per gateway service.

use std::{collections::HashSet, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, Serializer},
};

use onegate_protocol::{
    DEFAULT_API_TIMEOUT_MS, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_UNIVERSAL_PATH,
};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnegateConfig {
    pub services: Vec<ServiceConfig>,
}

impl Default for OnegateConfig {
    fn default() -> Self {
        Self {
            services: vec![ServiceConfig::default()],
        }
    }
}

/// A single listening endpoint for bot connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name used in logs and the health endpoint.
    pub name: String,

    pub host: String,

    /// `0` binds an ephemeral port.
    pub port: u16,

    /// Expected request path for `Universal` clients.
    pub universal_path: String,

    /// When set, clients must present this token.
    #[serde(
        serialize_with = "serialize_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub access_token: Option<Secret<String>>,

    /// Deadline for outbound action calls.
    pub api_timeout_ms: u64,

    /// Close connections silent for this long. `0` disables the check.
    pub heartbeat_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            universal_path: DEFAULT_UNIVERSAL_PATH.into(),
            access_token: None,
            api_timeout_ms: DEFAULT_API_TIMEOUT_MS,
            heartbeat_timeout_ms: 0,
        }
    }
}

impl ServiceConfig {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        (self.heartbeat_timeout_ms > 0).then(|| Duration::from_millis(self.heartbeat_timeout_ms))
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Configured token, ignoring blank values.
    pub fn token(&self) -> Option<&str> {
        self.access_token
            .as_ref()
            .map(|t| t.expose_secret().as_str())
            .filter(|t| !t.trim().is_empty())
    }
}

impl OnegateConfig {
    /// Reject configurations the gateway cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.services.is_empty() {
            anyhow::bail!("no services configured");
        }
        let mut names = HashSet::new();
        for service in &self.services {
            if !names.insert(service.name.as_str()) {
                anyhow::bail!("duplicate service name: {}", service.name);
            }
            if !service.universal_path.starts_with('/') {
                anyhow::bail!(
                    "service {}: universal_path must start with '/' (got {:?})",
                    service.name,
                    service.universal_path
                );
            }
            if service.api_timeout_ms == 0 {
                anyhow::bail!("service {}: api_timeout_ms must be positive", service.name);
            }
        }
        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

fn serialize_secret<S: Serializer>(
    value: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}
