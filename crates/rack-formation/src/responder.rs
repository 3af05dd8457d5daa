//! Delivers replies to the pre-signed URL the engine handed out.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{FormationError, FormationResult};
use crate::request::Response;

#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, url: &str, response: &Response) -> FormationResult<()>;
}

/// PUTs the JSON reply. The URL is signed without a content type, so the
/// header is sent empty.
pub struct HttpResponder {
    client: reqwest::Client,
}

impl HttpResponder {
    pub fn new(timeout: Duration) -> FormationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FormationError::Response(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Responder for HttpResponder {
    async fn respond(&self, url: &str, response: &Response) -> FormationResult<()> {
        let body =
            serde_json::to_vec(response).map_err(|e| FormationError::Response(e.to_string()))?;
        let res = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "")
            .body(body)
            .send()
            .await
            .map_err(|e| FormationError::Response(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            return Err(FormationError::Response(format!("{url} returned {status}")));
        }
        debug!(request = %response.request_id, %status, "response delivered");
        Ok(())
    }
}
