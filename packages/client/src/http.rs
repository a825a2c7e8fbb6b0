//! Stateless HTTP transport: one POST per operation, no session state.

use async_trait::async_trait;
use url::Url;

use pathlink_api::{Error, Request, Response, WireResponse};

use crate::client::{Client, ClientCore};

/// Talks to a fixed endpoint with one POST per operation. The body and the
/// response body are exactly the wire request/response JSON.
pub struct HttpClient {
    core: ClientCore,
    endpoint: Url,
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new(endpoint: &str) -> Result<Self, Error> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::malformed(format!("bad endpoint url: {}", e)))?;
        Ok(Self {
            core: ClientCore::new(),
            endpoint,
            http: reqwest::Client::new(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Client for HttpClient {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    async fn volley(&self, request: Request) -> Result<Response, Error> {
        let wire = self.core.encode_request(&request)?;

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&wire)
            .send()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(format!(
                "operation failed with HTTP {}",
                status.as_u16()
            )));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| Error::transport(format!("bad response body: {}", e)))?;
        self.core.decode_response(&wire)
    }
}
