//! The shared full-fetch protocol: one principal GET plus up to three
//! feature-flagged auxiliary GETs, handed to the normalizer.

use crate::cancel::CancellationObserver;
use crate::error::PipelineError;
use duesync_config::FeatureFlags;
use duesync_core::DueNumber;
use duesync_http::{ClientError, HttpClient};
use duesync_normalizer::{NormalizedBatch, Normalizer, RevisionProbeJson};
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

const TRANSIENT_RETRIES: u32 = 2;

/// Runs the full-fetch protocol for one DUE: principal payload plus
/// whichever auxiliary payloads are feature-flagged on, normalized into one
/// batch. Checks cancellation between each call.
pub async fn fetch_due(
    http: &HttpClient,
    base_url: &str,
    flags: FeatureFlags,
    due_number: &DueNumber,
    cancel: &CancellationObserver,
) -> Result<NormalizedBatch, PipelineError> {
    check_cancelled(cancel)?;
    let principal = get_with_retry(http, &principal_url(base_url, due_number)).await?;

    let bonded_suspension = if flags.fetch_bonded_suspension {
        check_cancelled(cancel)?;
        Some(get_with_retry(http, &aux_url(base_url, due_number, "atos-concessorios/suspensao")).await?)
    } else {
        None
    };

    let bonded_exemption = if flags.fetch_bonded_exemption {
        check_cancelled(cancel)?;
        Some(get_with_retry(http, &aux_url(base_url, due_number, "atos-concessorios/isencao")).await?)
    } else {
        None
    };

    let fiscal_requirements = if flags.fetch_fiscal_requirements {
        check_cancelled(cancel)?;
        Some(get_with_retry(http, &aux_url(base_url, due_number, "exigencias-fiscais")).await?)
    } else {
        None
    };

    Normalizer::normalize(
        due_number,
        &principal,
        bonded_suspension.as_ref(),
        bonded_exemption.as_ref(),
        fiscal_requirements.as_ref(),
    )
    .map_err(PipelineError::from)
}

/// The cheap revision probe used by the refresh pipeline.
pub async fn probe_revision(
    http: &HttpClient,
    base_url: &str,
    due_number: &DueNumber,
) -> Result<RevisionProbeJson, PipelineError> {
    let body = get_with_retry(http, &principal_url(base_url, due_number)).await?;
    Normalizer::probe_revision(&body).map_err(PipelineError::from)
}

/// A lookup-by-invoice call: returns the raw JSON array of DUE numbers the
/// upstream associates with one invoice key (possibly empty).
pub async fn lookup_due_numbers(
    http: &HttpClient,
    base_url: &str,
    invoice_key: &str,
) -> Result<Vec<String>, PipelineError> {
    let url = format!("{base_url}/vinculos/{invoice_key}");
    let body = get_with_retry(http, &url).await?;
    Ok(match body {
        Value::Array(values) => values
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::Null => Vec::new(),
        other => other
            .get("numeros")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
    })
}

fn principal_url(base_url: &str, due_number: &DueNumber) -> String {
    format!("{base_url}/due/{due_number}")
}

fn aux_url(base_url: &str, due_number: &DueNumber, segment: &str) -> String {
    format!("{base_url}/due/{due_number}/{segment}")
}

fn check_cancelled(cancel: &CancellationObserver) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

async fn get_with_retry(http: &HttpClient, url: &str) -> Result<Value, PipelineError> {
    let mut attempt = 0u32;
    loop {
        match http.do_request(Method::GET, url, None).await {
            Ok(value) => return Ok(value),
            Err(ClientError::Transient(msg)) if attempt < TRANSIENT_RETRIES => {
                attempt += 1;
                let jitter_ms = rand::random::<u64>() % 250;
                let backoff = Duration::from_millis(200 * 2u64.pow(attempt) + jitter_ms);
                tracing::debug!(url, attempt, reason = %msg, "retrying transient failure");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
