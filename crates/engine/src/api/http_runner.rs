//! Backtest Runner reached over HTTP
//!
//! `POST {url}` with `{"params": {...}}`, plus `target_hold_period_days`
//! when the run constrains hold periods. A 2xx response carries
//! `PerformanceStats`; an error response may carry
//! `{"kind": "data" | "calculation" | "validation", "message": "..."}`.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::EvaluationError;
use crate::runner::BacktestRunner;
use crate::types::{ParamSet, PerformanceStats};

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// HTTP client for a remote Backtest Runner
#[derive(Clone)]
pub struct HttpBacktestRunner {
    client: Client,
    url: String,
    hold_target: Option<(f64, f64)>,
}

#[derive(Serialize)]
struct EvaluateRequest<'a> {
    params: &'a ParamSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_hold_period_days: Option<(f64, f64)>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    kind: String,
    message: String,
}

impl HttpBacktestRunner {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            hold_target: None,
        })
    }

    /// Ask the runner to count trades held within `[min, max]` days.
    pub fn with_hold_target(mut self, target: Option<(f64, f64)>) -> Self {
        self.hold_target = target;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Map a non-success response onto the failure taxonomy
fn map_error_response(status: StatusCode, body: &str) -> EvaluationError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => match err.kind.as_str() {
            "data" => EvaluationError::Data(err.message),
            "calculation" => EvaluationError::Calculation(err.message),
            "validation" => EvaluationError::Validation(err.message),
            other => EvaluationError::Unknown(anyhow::anyhow!(
                "Backtest runner error {} ({}): {}",
                status,
                other,
                err.message
            )),
        },
        Err(_) => EvaluationError::Unknown(anyhow::anyhow!(
            "Backtest runner error {}: {}",
            status,
            body
        )),
    }
}

#[async_trait]
impl BacktestRunner for HttpBacktestRunner {
    async fn evaluate(&self, params: &ParamSet) -> Result<PerformanceStats, EvaluationError> {
        debug!(url = %self.url, "Requesting backtest");

        let response = self
            .client
            .post(&self.url)
            .json(&EvaluateRequest {
                params,
                target_hold_period_days: self.hold_target,
            })
            .send()
            .await
            .context("Backtest runner request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_error_response(status, &body));
        }

        let stats: PerformanceStats = response
            .json()
            .await
            .context("Backtest runner returned undecodable stats")?;
        Ok(stats)
    }
}
