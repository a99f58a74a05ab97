//! HTTP client for the provider's ultra-short nowcast endpoint.
//!
//! One GET per (slot, cell) pair. The response envelope carries a provider
//! status code that distinguishes "success with zero or more items" from a
//! provider-reported error; an empty item list is the normal steady-state
//! answer for a slot that is not published yet.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::grid::Cell;
use crate::slot::TimeSlot;
use crate::upstream::{FetchError, ObservationFetch, RawItem};

const ENDPOINT: &str = "getUltraSrtNcst";

/// Provider result codes counted as success. The no-data code signals an
/// unpublished slot and is folded into the empty-items outcome.
const OK_CODES: &[&str] = &["00", "0"];
const NO_DATA_CODE: &str = "03";

pub struct NowcastClient {
    http: reqwest::Client,
    base_url: String,
    fallback_base_url: Option<String>,
    service_key: String,
    rows_per_page: u32,
}

impl NowcastClient {
    pub fn new(config: &UpstreamConfig, service_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            fallback_base_url: config
                .fallback_base_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            service_key,
            rows_per_page: config.rows_per_page,
        })
    }

    async fn call(
        &self,
        base: &str,
        slot: &TimeSlot,
        cell: Cell,
    ) -> Result<Vec<RawItem>, FetchError> {
        let url = format!("{base}/{ENDPOINT}");
        let response = self
            .http
            .get(&url)
            .query(&[
                ("serviceKey", self.service_key.clone()),
                ("numOfRows", self.rows_per_page.to_string()),
                ("pageNo", "1".to_string()),
                ("dataType", "JSON".to_string()),
                ("base_date", slot.base_date()),
                ("base_time", slot.base_time()),
                ("nx", cell.nx.to_string()),
                ("ny", cell.ny.to_string()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if status.is_server_error() {
            return Err(FetchError::Server {
                status: status.as_u16(),
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Auth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::BadRequest {
                status: status.as_u16(),
            });
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(Box::new(e)))?;
        envelope.into_items()
    }
}

#[async_trait]
impl ObservationFetch for NowcastClient {
    async fn fetch(&self, slot: &TimeSlot, cell: Cell) -> Result<Vec<RawItem>, FetchError> {
        match self.call(&self.base_url, slot, cell).await {
            Err(FetchError::Connect(e)) => match &self.fallback_base_url {
                Some(alternate) => {
                    debug!(error = %e, "Primary endpoint unreachable — retrying via alternate");
                    self.call(alternate, slot, cell).await
                }
                None => Err(FetchError::Connect(e)),
            },
            outcome => outcome,
        }
    }
}

fn classify_transport(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(e)
    } else {
        FetchError::Connect(e)
    }
}

// --- Provider envelope ---
//
// The provider wraps everything in response.header/response.body; fields are
// optional liberally because error envelopes omit the body and empty slots
// sometimes carry an empty string where the item container should be.

#[derive(Debug, Deserialize)]
struct Envelope {
    response: ProviderResponse,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    header: Header,
    #[serde(default)]
    body: Option<Body>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default, rename = "resultCode")]
    result_code: Option<serde_json::Value>,
    #[serde(default, rename = "resultMsg")]
    result_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Body {
    #[serde(default)]
    items: Option<serde_json::Value>,
}

impl Envelope {
    fn into_items(self) -> Result<Vec<RawItem>, FetchError> {
        let code = match &self.response.header.result_code {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };

        if code == NO_DATA_CODE {
            return Ok(Vec::new());
        }
        if !OK_CODES.contains(&code.as_str()) {
            return Err(FetchError::Provider {
                code,
                message: self.response.header.result_msg.unwrap_or_default(),
            });
        }

        // An absent container (or the empty string the provider sends for an
        // unpublished slot) is a normal empty result; a container that fails
        // to decode is a malformed body, not an empty one.
        match self
            .response
            .body
            .and_then(|body| body.items)
            .and_then(|items| items.get("item").cloned())
        {
            Some(item) => serde_json::from_value::<Vec<RawItem>>(item)
                .map_err(|e| FetchError::Malformed(Box::new(e))),
            None => Ok(Vec::new()),
        }
    }
}
