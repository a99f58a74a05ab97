//! Upstream observation provider: wire types, failure taxonomy, and the
//! fetch seam the orchestrator consumes.

pub mod client;
pub mod governor;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::grid::Cell;
use crate::slot::TimeSlot;

/// Measurement categories the provider publishes for one cell and slot.
/// Each maps to exactly one field of the stored observation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Temperature,
    Humidity,
    WindSpeed,
    WindDirection,
    WindEastWest,
    WindNorthSouth,
    PrecipType,
    PrecipAmount,
    Lightning,
}

impl Category {
    /// Resolves a provider category code. Unknown codes map to `None` and
    /// are skipped by the caller rather than treated as errors.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "T1H" => Some(Self::Temperature),
            "REH" => Some(Self::Humidity),
            "WSD" => Some(Self::WindSpeed),
            "VEC" => Some(Self::WindDirection),
            "UUU" => Some(Self::WindEastWest),
            "VVV" => Some(Self::WindNorthSouth),
            "PTY" => Some(Self::PrecipType),
            "RN1" | "PCP" => Some(Self::PrecipAmount),
            "LGT" => Some(Self::Lightning),
            _ => None,
        }
    }
}

/// One category/value pair from the provider envelope. The provider encodes
/// values inconsistently (numbers, numeric strings, qualitative labels), so
/// the raw value is kept as JSON until field mapping.
#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    #[serde(default)]
    pub category: String,
    #[serde(default, rename = "obsrValue")]
    pub obsr_value: Option<serde_json::Value>,
}

impl RawItem {
    /// The observed value as text, if present. Numbers are rendered without
    /// quoting; strings are passed through verbatim.
    pub fn value_text(&self) -> Option<String> {
        match &self.obsr_value {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Classification of a single failed outbound call. Closed on purpose: the
/// orchestrator consumes these by exhaustive match, never by string
/// inspection across layers.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout(#[source] reqwest::Error),
    #[error("connection to upstream failed")]
    Connect(#[source] reqwest::Error),
    #[error("upstream server error: {status}")]
    Server { status: u16 },
    #[error("upstream rejected call rate")]
    RateLimited,
    #[error("credential rejected: {status}")]
    Auth { status: u16 },
    #[error("request rejected: {status}")]
    BadRequest { status: u16 },
    #[error("malformed response body")]
    Malformed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("provider error {code}: {message}")]
    Provider { code: String, message: String },
}

impl FetchError {
    /// Transient failures the governor may retry. Everything else is fatal
    /// for the call (but not for the fallback walk).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connect(_) | Self::Server { .. } | Self::RateLimited
        )
    }

    /// Short tag for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Connect(_) => "connect",
            Self::Server { .. } => "server",
            Self::RateLimited => "rate_limited",
            Self::Auth { .. } => "auth",
            Self::BadRequest { .. } => "bad_request",
            Self::Malformed(_) => "malformed",
            Self::Provider { .. } => "provider",
        }
    }
}

/// Seam between the orchestrator and the HTTP client, so tests can script
/// fetch outcomes without a network.
#[async_trait]
pub trait ObservationFetch: Send + Sync {
    /// One call for one (slot, cell) pair. An empty vector means the slot is
    /// not published yet, which is a normal outcome rather than an error.
    async fn fetch(&self, slot: &TimeSlot, cell: Cell) -> Result<Vec<RawItem>, FetchError>;
}
