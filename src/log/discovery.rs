//! Discovery of the CT logs to monitor from a published log list.

use crate::log::source::LogSource;
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::Deserialize;
use std::collections::HashSet;

pub const DEFAULT_LOG_LIST_URL: &str = "https://www.gstatic.com/ct/log_list/all_logs_list.json";

#[derive(Debug, Default, Deserialize)]
struct LogList {
    #[serde(default)]
    logs: Vec<LogListEntry>,
    #[serde(default)]
    operators: Vec<Operator>,
}

#[derive(Debug, Default, Deserialize)]
struct Operator {
    #[serde(default)]
    name: String,
    #[serde(default)]
    logs: Vec<LogListEntry>,
}

#[derive(Debug, Deserialize)]
struct LogListEntry {
    #[serde(default)]
    key: String,
    url: String,
}

/// Downloads and parses the log list at `list_url`.
pub async fn fetch_log_list(http: &reqwest::Client, list_url: &str) -> Result<Vec<LogSource>> {
    let response = http
        .get(list_url)
        .send()
        .await
        .with_context(|| format!("failed to fetch log list from {list_url}"))?
        .error_for_status()
        .with_context(|| format!("log list request to {list_url} failed"))?;
    let body = response
        .bytes()
        .await
        .with_context(|| format!("failed to read log list body from {list_url}"))?;

    let sources = parse_log_list(&body)?;
    tracing::info!(list = list_url, logs = sources.len(), "discovered CT logs");
    Ok(sources)
}

/// Parses either the flat `{"logs": [...]}` layout or the operator layout
/// `{"operators": [{"logs": [...]}]}`. Entries with an undecodable key or URL
/// are logged and skipped; duplicate URLs are kept once.
pub fn parse_log_list(body: &[u8]) -> Result<Vec<LogSource>> {
    let list: LogList = serde_json::from_slice(body).context("failed to parse log list")?;

    let flat = list.logs.iter().map(|entry| ("", entry));
    let grouped = list
        .operators
        .iter()
        .flat_map(|operator| operator.logs.iter().map(move |entry| (operator.name.as_str(), entry)));

    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for (operator, entry) in flat.chain(grouped) {
        match source_from_entry(entry) {
            Ok(source) => {
                if seen.insert(source.id()) {
                    sources.push(source);
                }
            }
            Err(err) => {
                tracing::warn!(operator, url = %entry.url, error = %err, "skipping log list entry");
            }
        }
    }

    if sources.is_empty() {
        bail!("log list contains no usable logs");
    }
    Ok(sources)
}

fn source_from_entry(entry: &LogListEntry) -> Result<LogSource> {
    let key = BASE64_STANDARD
        .decode(entry.key.trim())
        .context("public key is not valid base64")?;
    LogSource::new(&normalize_log_url(&entry.url), key)
}

/// Forces the `https` scheme: scheme-less URLs gain one and any other scheme
/// is replaced.
pub fn normalize_log_url(raw: &str) -> String {
    let raw = raw.trim();
    let rest = match raw.split_once("://") {
        Some((_, rest)) => rest,
        None => raw,
    };
    format!("https://{rest}")
}
