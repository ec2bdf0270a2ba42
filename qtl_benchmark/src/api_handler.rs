// src/api_handler.rs

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;

/// Thin JSON client shared by the annotation and scoring collaborators.
pub struct APIHandler {
    client: Client,
    base_url: String,
}

impl APIHandler {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("qtl_benchmark/", env!("CARGO_PKG_VERSION"))),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// POSTs an url-encoded form and parses the JSON reply.
    pub fn post_form<F: Serialize + ?Sized>(&self, endpoint: &str, form: &F) -> Result<Value> {
        let url = self.url(endpoint);
        debug!("POST {}", url);
        self.send_with_retry(&url, || self.client.post(&url).form(form))
    }

    /// POSTs a JSON body with extra headers and parses the JSON reply.
    pub fn post_json<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        headers: HeaderMap,
    ) -> Result<Value> {
        let url = self.url(endpoint);
        debug!("POST {}", url);
        self.send_with_retry(&url, || {
            self.client.post(&url).headers(headers.clone()).json(body)
        })
    }

    fn send_with_retry(
        &self,
        url: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Value> {
        let mut attempts = 0;

        loop {
            let response = build()
                .send()
                .with_context(|| format!("request to {url} failed"))?;

            if response.status().is_success() {
                return response
                    .json()
                    .with_context(|| format!("invalid JSON from {url}"));
            } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
                attempts += 1;
                if attempts >= MAX_ATTEMPTS {
                    return Err(anyhow!("Exceeded maximum retries for URL: {}", url));
                }

                let wait_time = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                warn!("Rate limited. Waiting {} seconds before retrying...", wait_time);
                thread::sleep(Duration::from_secs(wait_time));
            } else {
                let status = response.status();
                let error_text = response.text().unwrap_or_default();
                return Err(anyhow!(
                    "Failed to fetch data from URL: {}. Status: {}. Error: {}",
                    url,
                    status,
                    error_text
                ));
            }
        }
    }
}
