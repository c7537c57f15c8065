//! Telemetry event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// LLM provider that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }
}

/// Outcome of the instrumented call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Error,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Build a usage triple, deriving the total.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// One observed provider call.
///
/// The pipeline moves these around without interpreting them. Field names
/// on the wire are camelCase and `error` is omitted when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub timestamp: DateTime<Utc>,
    pub provider: Provider,
    pub model: String,
    pub tokens: TokenUsage,
    /// Cost in USD.
    pub cost: f64,
    /// Latency in milliseconds.
    pub latency: u64,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TelemetryEvent {
    /// Event for a call that completed successfully, stamped with the current time.
    pub fn success(
        provider: Provider,
        model: impl Into<String>,
        tokens: TokenUsage,
        cost: f64,
        latency: Duration,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            provider,
            model: model.into(),
            tokens,
            cost,
            latency: latency.as_millis() as u64,
            status: EventStatus::Success,
            error: None,
        }
    }

    /// Event for a call that failed at the provider.
    pub fn failure(
        provider: Provider,
        model: impl Into<String>,
        latency: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            provider,
            model: model.into(),
            tokens: TokenUsage::default(),
            cost: 0.0,
            latency: latency.as_millis() as u64,
            status: EventStatus::Error,
            error: Some(error.into()),
        }
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency)
    }
}

/// Body returned by the ingest endpoint. Read when present, never required.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IngestionResponse {
    #[serde(default)]
    pub accepted: u64,
    #[serde(default)]
    pub message: String,
}
