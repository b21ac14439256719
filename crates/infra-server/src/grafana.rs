//! Grafana alerting webhook payloads and their mapping onto intents.
//!
//! A firing alert becomes an intent when it names a target through the
//! configured label and a desired state through the configured annotation:
//!
//! ```yaml
//! labels:
//!   infra_target: cache-cluster-1
//! annotations:
//!   desired_state: scaled_to=6
//! ```
//!
//! Labels and annotations missing on the alert fall back to the
//! notification's common ones. The alert fingerprint (or, without one, the
//! notification group key) becomes the intent's correlation id.

use chrono::{DateTime, Utc};
use infra_core::{GrafanaWebhookConfig, Intent, ResourceState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Notification body posted by a Grafana webhook contact point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaWebhookPayload {
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub org_id: Option<i64>,
    #[serde(default)]
    pub alerts: Vec<GrafanaAlert>,
    #[serde(default)]
    pub group_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub group_key: String,
    #[serde(default)]
    pub truncated_alerts: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaAlert {
    pub status: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "generatorURL")]
    pub generator_url: Option<String>,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

impl GrafanaAlert {
    pub fn is_firing(&self) -> bool {
        self.status.eq_ignore_ascii_case("firing")
    }
}

/// An alert that did not produce a running plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedAlert {
    /// Position of the alert in the notification.
    pub index: usize,
    pub fingerprint: String,
    pub reason: String,
}

/// Map every alert of a notification, keeping its position.
pub fn intents_from(
    payload: &GrafanaWebhookPayload,
    config: &GrafanaWebhookConfig,
) -> (Vec<(usize, Intent)>, Vec<SkippedAlert>) {
    let mut intents = Vec::new();
    let mut skipped = Vec::new();
    for (index, alert) in payload.alerts.iter().enumerate() {
        match alert_to_intent(payload, alert, config) {
            Ok(intent) => intents.push((index, intent)),
            Err(reason) => skipped.push(SkippedAlert {
                index,
                fingerprint: alert.fingerprint.clone(),
                reason,
            }),
        }
    }
    (intents, skipped)
}

/// Build the intent for one alert, or say why there is none.
pub fn alert_to_intent(
    payload: &GrafanaWebhookPayload,
    alert: &GrafanaAlert,
    config: &GrafanaWebhookConfig,
) -> Result<Intent, String> {
    if !alert.is_firing() {
        return Err(format!("alert is {}", alert.status));
    }
    let target = alert
        .labels
        .get(&config.target_label)
        .or_else(|| payload.common_labels.get(&config.target_label))
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| format!("missing label `{}`", config.target_label))?;
    let raw = alert
        .annotations
        .get(&config.desired_annotation)
        .or_else(|| payload.common_annotations.get(&config.desired_annotation))
        .ok_or_else(|| format!("missing annotation `{}`", config.desired_annotation))?;
    let desired: ResourceState = raw
        .parse()
        .map_err(|e| format!("invalid `{}`: {e}", config.desired_annotation))?;
    if desired.is_empty() {
        return Err(format!("annotation `{}` is empty", config.desired_annotation));
    }

    let mut intent = Intent::new(target.trim(), desired);
    if !alert.fingerprint.is_empty() {
        intent = intent.with_correlation_id(&alert.fingerprint);
    } else if !payload.group_key.is_empty() {
        intent = intent.with_correlation_id(&payload.group_key);
    }
    Ok(intent)
}
