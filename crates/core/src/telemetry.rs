use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_TELEMETRY_ENDPOINT: &str = "https://api.smith.langchain.com";

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub endpoint: String,
    pub api_key: String,
    pub project: Option<String>,
}

impl TelemetryConfig {
    /// Tracing is on only when explicitly enabled and a key is present.
    pub fn from_parts(
        enabled: Option<&str>,
        api_key: Option<String>,
        project: Option<String>,
        endpoint: Option<String>,
    ) -> Option<Self> {
        let enabled = enabled
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);
        if !enabled {
            return None;
        }

        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())?;

        let endpoint = endpoint
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_TELEMETRY_ENDPOINT.to_string());

        Some(Self {
            endpoint,
            api_key,
            project: project.filter(|value| !value.trim().is_empty()),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub name: String,
    pub run_type: String,
    pub inputs: Value,
    pub outputs: Option<Value>,
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
}

impl RunRecord {
    pub fn chain(name: impl Into<String>, inputs: Value, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            run_type: "chain".to_string(),
            inputs,
            outputs: None,
            error: None,
            start_time,
            end_time: start_time,
            session_name: None,
        }
    }

    pub fn finish(mut self, result: Result<Value, String>) -> Self {
        self.end_time = Utc::now();
        match result {
            Ok(outputs) => self.outputs = Some(outputs),
            Err(error) => self.error = Some(error),
        }
        self
    }
}

/// Posts one record per run to a hosted tracing service. Failures are logged
/// and otherwise ignored.
pub struct RunTracer {
    config: TelemetryConfig,
    client: Client,
}

impl RunTracer {
    pub fn new(config: TelemetryConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { config, client })
    }

    pub fn project(&self) -> Option<&str> {
        self.config.project.as_deref()
    }

    pub async fn record(&self, mut run: RunRecord) {
        if run.session_name.is_none() {
            run.session_name = self.config.project.clone();
        }

        let result = self
            .client
            .post(format!("{}/runs", self.config.endpoint))
            .header("x-api-key", &self.config.api_key)
            .json(&run)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(run_id = %run.id, name = %run.name, "run recorded");
            }
            Ok(response) => {
                warn!(run_id = %run.id, status = %response.status(), "telemetry rejected run");
            }
            Err(error) => {
                warn!(run_id = %run.id, %error, "telemetry request failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tracing_requires_flag_and_key() {
        assert!(TelemetryConfig::from_parts(None, Some("key".into()), None, None).is_none());
        assert!(TelemetryConfig::from_parts(Some("false"), Some("key".into()), None, None).is_none());
        assert!(TelemetryConfig::from_parts(Some("true"), Some("  ".into()), None, None).is_none());

        let config = TelemetryConfig::from_parts(
            Some("TRUE"),
            Some("key".into()),
            Some("talkdocs".into()),
            Some("https://traces.example.com/".into()),
        )
        .expect("config should be enabled");
        assert_eq!(config.endpoint, "https://traces.example.com");
        assert_eq!(config.project.as_deref(), Some("talkdocs"));
    }

    #[test]
    fn default_endpoint_is_used_when_unset() {
        let config = TelemetryConfig::from_parts(Some("1"), Some("key".into()), None, None)
            .expect("config should be enabled");
        assert_eq!(config.endpoint, DEFAULT_TELEMETRY_ENDPOINT);
    }

    #[test]
    fn finished_run_serializes_outputs_or_error() {
        let started = Utc::now();
        let ok = RunRecord::chain("ask", json!({ "question": "total?" }), started)
            .finish(Ok(json!({ "answer": "$42.00" })));
        let value = serde_json::to_value(&ok).expect("run should serialize");
        assert_eq!(value["run_type"], "chain");
        assert_eq!(value["outputs"]["answer"], "$42.00");
        assert!(value["error"].is_null());
        assert!(value.get("session_name").is_none());

        let failed = RunRecord::chain("ask", json!({}), started).finish(Err("timeout".to_string()));
        let value = serde_json::to_value(&failed).expect("run should serialize");
        assert_eq!(value["error"], "timeout");
        assert!(value["outputs"].is_null());
    }
}
