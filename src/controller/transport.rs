//! HTTPS transport for the controller XML API.
//!
//! Controllers ship self-signed certificates, so certificate validation is
//! disabled. Each request carries a timeout and is retried with jittered
//! exponential backoff on connection errors and server errors.

use super::digest::DigestChallenge;
use super::xml::XmlElement;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use rand::Rng;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{StatusCode, Url};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Source of parsed XML documents from a controller.
#[async_trait]
pub trait XmlTransport: Send + Sync {
    /// GET a URL and parse the response body as XML.
    async fn get_xml(&self, url: &str) -> Result<XmlElement>;

    /// GET an attribute value document and return its root `val` attribute.
    async fn get_value(&self, url: &str) -> Result<Option<String>> {
        let root = self.get_xml(url).await?;
        Ok(root.attr("val").map(str::to_string))
    }
}

/// Credentials for HTTP Digest authentication.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub retries: u32,
    pub backoff_base: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 2,
            backoff_base: Duration::from_millis(250),
        }
    }
}

/// Outcome of a single failed attempt.
enum AttemptError {
    Retryable(BridgeError),
    Final(BridgeError),
}

/// reqwest-backed transport for one controller.
pub struct HttpTransport {
    client: reqwest::Client,
    credentials: Option<Credentials>,
    settings: TransportSettings,
    /// Last digest challenge, reused until the controller rejects it.
    challenge: Mutex<Option<DigestChallenge>>,
    nonce_count: AtomicU32,
}

impl HttpTransport {
    pub fn new(credentials: Option<Credentials>, settings: TransportSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .danger_accept_invalid_certs(true)
            .user_agent(format!("tracer-mqtt-bridge/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::transport("client", format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            credentials,
            settings,
            challenge: Mutex::new(None),
            nonce_count: AtomicU32::new(0),
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(text) => return Ok(text),
                Err(AttemptError::Retryable(e)) if attempt < self.settings.retries => {
                    let delay = self.backoff(attempt);
                    debug!(
                        "Request to {} failed ({}), retrying in {:?}",
                        url, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(AttemptError::Retryable(e)) | Err(AttemptError::Final(e)) => return Err(e),
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.settings.backoff_base.as_millis() as u64;
        let exponential = base.saturating_mul(1u64 << attempt.min(10));
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(exponential + jitter)
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<String, AttemptError> {
        let mut response = self.send(url).await?;

        if response.status() == StatusCode::UNAUTHORIZED && self.credentials.is_some() {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(DigestChallenge::parse);

            if let Some(challenge) = challenge {
                debug!("Received digest challenge for realm {}", challenge.realm);
                *self.challenge.lock() = Some(challenge);
                self.nonce_count.store(0, Ordering::SeqCst);
                response = self.send(url).await?;
            }
        }

        let status = response.status();
        if status != StatusCode::OK {
            let err = BridgeError::transport(url, format!("HTTP status {status}"));
            return Err(if status.is_server_error() {
                AttemptError::Retryable(err)
            } else {
                AttemptError::Final(err)
            });
        }

        response
            .text()
            .await
            .map_err(|e| AttemptError::Retryable(BridgeError::transport(url, e)))
    }

    async fn send(&self, url: &str) -> std::result::Result<reqwest::Response, AttemptError> {
        let mut request = self.client.get(url);
        if let Some(authorization) = self.authorization_for(url) {
            request = request.header(AUTHORIZATION, authorization);
        }

        request
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(BridgeError::transport(url, e)))
    }

    fn authorization_for(&self, url: &str) -> Option<String> {
        let credentials = self.credentials.as_ref()?;
        let challenge = self.challenge.lock().clone()?;
        let parsed = Url::parse(url).ok()?;
        let uri = match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        };
        let nc = self.nonce_count.fetch_add(1, Ordering::SeqCst) + 1;

        Some(challenge.authorization(
            &credentials.username,
            &credentials.password,
            "GET",
            &uri,
            nc,
        ))
    }
}

#[async_trait]
impl XmlTransport for HttpTransport {
    async fn get_xml(&self, url: &str) -> Result<XmlElement> {
        let text = self.get_text(url).await?;
        XmlElement::parse(url, &text)
    }
}
