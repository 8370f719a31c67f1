//! Backend "unlock" call.
//!
//! One POST per tag read, JSON both ways. No retries and no timeout: the user
//! taps again if something went wrong.

use async_trait::async_trait;
use log::Level;
use reqwest::{Client, Url};
use thiserror::Error;

use shared::constants::UNKNOWN_ERROR_DETAIL;
use shared::events::{ErrorBody, UnlockRequest, UnlockResult};

use crate::config::model::ApiConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnlockError {
    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {detail}")]
    Rejected { status: u16, detail: String },

    /// No usable answer: transport failure, or a success body we could not
    /// decode.
    #[error("{0}")]
    Network(String),
}

/// Something that can unlock the character bound to a tag.
#[async_trait]
pub trait UnlockClient: Send + Sync + 'static {
    async fn unlock(&self, serial_number: &str) -> Result<UnlockResult, UnlockError>;
}

/// `reqwest` implementation talking to the collectibles backend.
#[derive(Debug, Clone)]
pub struct HttpUnlockClient {
    http:     Client,
    endpoint: Url,
}

impl HttpUnlockClient {
    pub fn new(api: &ApiConfig) -> Self {
        Self::with_client(Client::new(), api.unlock_url.clone())
    }

    pub fn with_client(http: Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl UnlockClient for HttpUnlockClient {
    async fn unlock(&self, serial_number: &str) -> Result<UnlockResult, UnlockError> {
        let body = UnlockRequest { serial_number: serial_number.to_owned() };
        nfc_log!(Level::Debug, "unlock", "POST {} serial={}", self.endpoint, serial_number);

        // `.json()` sets `Content-Type: application/json`.
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| UnlockError::Network(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<UnlockResult>()
                .await
                .map_err(|e| UnlockError::Network(format!("bad unlock response: {e}")));
        }

        let detail = resp
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.detail_text())
            .unwrap_or_else(|| UNKNOWN_ERROR_DETAIL.to_owned());
        nfc_log!(Level::Warn, "unlock", "backend answered {} for {}: {}", status, serial_number, detail);
        Err(UnlockError::Rejected { status: status.as_u16(), detail })
    }
}
