//! HTTP server and inbound webhook configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// `host:port` suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhooksConfig {
    #[serde(default)]
    pub grafana: GrafanaWebhookConfig,
}

/// Mapping of Grafana alert notifications onto intents.
///
/// A firing alert becomes an intent when it carries the target label and the
/// desired-state annotation, e.g. label `infra_target=cache-cluster-1` and
/// annotation `desired_state=scaled_to=6`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrafanaWebhookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_target_label")]
    pub target_label: String,

    #[serde(default = "default_desired_annotation")]
    pub desired_annotation: String,
}

impl Default for GrafanaWebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_label: default_target_label(),
            desired_annotation: default_desired_annotation(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_target_label() -> String {
    "infra_target".to_string()
}

fn default_desired_annotation() -> String {
    "desired_state".to_string()
}
