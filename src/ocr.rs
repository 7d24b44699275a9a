// src/ocr.rs
//
// Client for the external OCR capability that turns a receipt image into
// free text. The backend is slow and occasionally unavailable, so every call
// carries a hard timeout and a circuit breaker; callers degrade the
// classification to manual review on any error here.

use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

const OCR_TIMEOUT: Duration = Duration::from_secs(20);
const BREAKER_THRESHOLD: u32 = 3;
const BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("ocr http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ocr api error status={status} body={body}")]
    Api { status: u16, body: String },

    #[error("ocr request timed out")]
    Timeout,

    #[error("ocr circuit breaker open")]
    CircuitOpen,

    #[error("ocr backend not configured")]
    NotConfigured,

    #[error("invalid ocr response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            open_until: None,
        }
    }

    fn is_open(&mut self, now: Instant) -> bool {
        match self.open_until {
            Some(until) if now < until => true,
            Some(_) => {
                // cooldown elapsed, allow a probe request through
                self.open_until = None;
                false
            }
            None => false,
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open_until = None;
    }

    fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= BREAKER_THRESHOLD {
            self.open_until = Some(now + BREAKER_COOLDOWN);
        }
    }
}

#[derive(Clone)]
pub struct OcrClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    breaker: Arc<Mutex<BreakerState>>,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: String,
}

impl OcrClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(OCR_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
            breaker: Arc::new(Mutex::new(BreakerState::new())),
        }
    }

    /// Reads OCR_API_URL / OCR_API_KEY; an unconfigured client fails fast
    /// with `NotConfigured`, which callers treat like any other OCR failure.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("OCR_API_URL").unwrap_or_default(),
            std::env::var("OCR_API_KEY").unwrap_or_default(),
        )
    }

    /// Runs OCR on an uploaded receipt image and returns the recognized text.
    pub async fn extract_text(&self, image_url: &str, language: &str) -> Result<String, OcrError> {
        if self.base_url.is_empty() {
            return Err(OcrError::NotConfigured);
        }

        {
            let mut breaker = self.breaker.lock().unwrap();
            if breaker.is_open(Instant::now()) {
                return Err(OcrError::CircuitOpen);
            }
        }

        let result = self.recognize(image_url, language).await;

        let mut breaker = self.breaker.lock().unwrap();
        match &result {
            Ok(_) => breaker.record_success(),
            Err(_) => breaker.record_failure(Instant::now()),
        }

        result
    }

    async fn recognize(&self, image_url: &str, language: &str) -> Result<String, OcrError> {
        let resp = self
            .http
            .post(format!("{}/v1/parse", self.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "image_url": image_url,
                "language": language,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OcrError::Timeout
                } else {
                    OcrError::Http(e)
                }
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(OcrError::Http)?;

        if !status.is_success() {
            return Err(OcrError::Api {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str::<OcrResponse>(&body)
            .map(|r| r.text)
            .map_err(|e| OcrError::InvalidResponse(format!("{e}; body={body}")))
    }
}
