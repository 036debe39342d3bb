//! Blocking client for the remote config store.
//!
//! The store keeps one JSON record per key, shaped like
//! `{"motor": 0, "color": "R"}`. It is read over plain GET at
//! `{base}/{key}.json`, with an optional `auth` query parameter.

use std::time::Duration;

use anyhow::Context;
use detect_core::{ColorClass, ParseColorClassError};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::sorter::config::RemoteOptions;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Failure modes of one poll cycle. All of them leave the previously
/// published detection range in effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config request failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("config store responded with {0}")]
    Status(StatusCode),
    #[error("config record is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("config record rejected: {0}")]
    UnknownColorClass(#[from] ParseColorClassError),
}

/// One decoded record from the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Raw motor command carried alongside the colour. Currently unused
    /// by the pipeline but kept so operators can see it in logs.
    pub actuator_command: i64,
    /// Colour class the sorter should select for.
    pub color_class: ColorClass,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    motor: i64,
    color: String,
}

/// HTTP client bound to one record in the store.
pub struct ConfigClient {
    http: Client,
    url: String,
    auth_token: Option<String>,
}

impl ConfigClient {
    pub fn new(options: &RemoteOptions) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client for the config store")?;
        Ok(Self {
            http,
            url: endpoint_url(&options.base_url, &options.key),
            auth_token: options.auth_token.clone(),
        })
    }

    /// Fetch and decode the current record.
    pub fn fetch(&self) -> Result<RemoteConfig, ConfigError> {
        let mut request = self.http.get(&self.url);
        if let Some(token) = &self.auth_token {
            request = request.query(&[("auth", token.as_str())]);
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConfigError::Status(status));
        }
        decode_config(&response.text()?)
    }
}

fn endpoint_url(base_url: &str, key: &str) -> String {
    format!("{}/{}.json", base_url.trim_end_matches('/'), key)
}

/// Decode a store record. A missing key reads as the JSON literal
/// `null`, which fails here as malformed rather than silently resetting
/// the colour.
pub(crate) fn decode_config(body: &str) -> Result<RemoteConfig, ConfigError> {
    let raw: RawConfig = serde_json::from_str(body)?;
    let color_class: ColorClass = raw.color.parse()?;
    Ok(RemoteConfig {
        actuator_command: raw.motor,
        color_class,
    })
}
