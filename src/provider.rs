//! Remote primary-key providers.
//!
//! A provider is a URL prefix serving the known key values for a schema in a
//! line-oriented text format. For every primary key declaration carrying
//! providers, the fetcher composes one URL per provider and retrieves the
//! payload with bounded concurrency.
//!
//! # URL composition
//!
//! `url = provider + schema_id[schema_prefix.len()..]` when `schema_prefix`
//! is a prefix of the schema id; otherwise the schema id is appended
//! verbatim.
//!
//! # Retry Strategy
//!
//! Transient failures retry with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately for that URL
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::keys::KeyTuple;

/// One URL to fetch on behalf of a primary key declaration.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub schema_id: String,
    pub pk_name: Option<String>,
    pub url: String,
    pub accept: String,
}

/// The outcome of one fetch job, successful or not.
#[derive(Debug)]
pub struct FetchOutcome {
    pub job: FetchJob,
    pub result: Result<Vec<KeyTuple>>,
}

pub fn compose_url(provider: &str, schema_id: &str, schema_prefix: Option<&str>) -> String {
    let suffix = match schema_prefix {
        Some(prefix) if schema_id.starts_with(prefix) => &schema_id[prefix.len()..],
        _ => schema_id,
    };
    format!("{}{}", provider, suffix)
}

/// Parses a provider payload into 1-tuples.
///
/// `text/uri-list` yields one value per non-comment, non-blank line;
/// `text/csv` yields the first column of every row.
pub fn parse_payload(body: &str, accept: &str) -> Vec<KeyTuple> {
    let csv = accept.starts_with("text/csv");
    body.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            if !csv && line.starts_with('#') {
                return None;
            }
            let value = if csv {
                line.split(',').next().unwrap_or_default().trim()
            } else {
                line
            };
            if value.is_empty() {
                None
            } else {
                Some(KeyTuple::from_config_value(&Value::String(
                    value.to_string(),
                )))
            }
        })
        .collect()
}

pub struct ProviderFetcher {
    client: reqwest::Client,
    options: FetchConfig,
}

impl ProviderFetcher {
    pub fn new(options: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            options: options.clone(),
        })
    }

    /// Fetches one provider URL, retrying transient failures.
    pub async fn fetch_keys(&self, url: &str, accept: &str) -> Result<Vec<KeyTuple>> {
        fetch_with_retries(&self.client, url, accept, self.options.max_retries).await
    }

    /// Runs all jobs, at most `fetch.concurrency` in flight at once.
    /// Outcomes keep job order so downstream bookkeeping is deterministic.
    pub async fn fetch_all(&self, jobs: Vec<FetchJob>) -> Vec<FetchOutcome> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        let mut queue = jobs.into_iter();

        loop {
            let batch: Vec<FetchJob> = queue.by_ref().take(self.options.concurrency).collect();
            if batch.is_empty() {
                break;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for job in batch {
                let client = self.client.clone();
                let retries = self.options.max_retries;
                handles.push(tokio::spawn(async move {
                    let result = fetch_with_retries(&client, &job.url, &job.accept, retries).await;
                    FetchOutcome { job, result }
                }));
            }
            for handle in handles {
                match handle.await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => warn!(error = %e, "provider fetch task panicked"),
                }
            }
        }

        outcomes
    }
}

async fn fetch_with_retries(
    client: &reqwest::Client,
    url: &str,
    accept: &str,
    max_retries: u32,
) -> Result<Vec<KeyTuple>> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client.get(url).header("Accept", accept).send().await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let body = response.text().await?;
                    let tuples = parse_payload(&body, accept);
                    debug!(url, count = tuples.len(), "fetched provider keys");
                    return Ok(tuples);
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("provider returned {} for {}", status, url));
                    continue;
                }

                // Client error (not 429) — don't retry
                bail!("provider returned {} for {}", status, url);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("provider fetch failed after retries: {}", url)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_strips_matching_schema_prefix() {
        let url = compose_url(
            "https://keys.example.org/",
            "https://schemas.example.org/sample/1.0",
            Some("https://schemas.example.org/"),
        );
        assert_eq!(url, "https://keys.example.org/sample/1.0");
    }

    #[test]
    fn url_appends_schema_id_verbatim_without_prefix_match() {
        let url = compose_url(
            "https://keys.example.org/?id=",
            "urn:sample:1.0",
            Some("https://schemas.example.org/"),
        );
        assert_eq!(url, "https://keys.example.org/?id=urn:sample:1.0");

        let url = compose_url("https://keys.example.org/", "sample/1.0", None);
        assert_eq!(url, "https://keys.example.org/sample/1.0");
    }

    #[test]
    fn uri_list_skips_comments_and_blanks() {
        let body = "# header comment\nhttps://a\n\nhttps://b\n  \n";
        let tuples = parse_payload(body, "text/uri-list");
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0], KeyTuple::from_config_value(&json!("https://a")));
        assert_eq!(tuples[1], KeyTuple::from_config_value(&json!("https://b")));
    }

    #[test]
    fn csv_takes_first_column() {
        let body = "X,extra,columns\nY, more\nZ\n";
        let tuples = parse_payload(body, "text/csv");
        assert_eq!(tuples.len(), 3);
        assert_eq!(tuples[0], KeyTuple::from_config_value(&json!("X")));
        assert_eq!(tuples[2], KeyTuple::from_config_value(&json!("Z")));
    }

    #[test]
    fn csv_hash_lines_are_data_not_comments() {
        let body = "#notacomment,1\n";
        let tuples = parse_payload(body, "text/csv");
        assert_eq!(
            tuples,
            vec![KeyTuple::from_config_value(&json!("#notacomment"))]
        );
    }

    #[test]
    fn empty_payload_yields_no_tuples() {
        assert!(parse_payload("", "text/uri-list").is_empty());
        assert!(parse_payload("\n# only comments\n", "text/uri-list").is_empty());
    }
}
