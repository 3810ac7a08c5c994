use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::GemproError;

/// Remote database a request goes to; selects the error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Kegg,
    Uniprot,
    Pdb,
}

impl Service {
    pub fn transport_error(self, message: String) -> GemproError {
        match self {
            Service::Kegg => GemproError::KeggHttp(message),
            Service::Uniprot => GemproError::UniprotHttp(message),
            Service::Pdb => GemproError::PdbHttp(message),
        }
    }

    pub fn status_error(self, status: u16, message: String) -> GemproError {
        match self {
            Service::Kegg => GemproError::KeggStatus { status, message },
            Service::Uniprot => GemproError::UniprotStatus { status, message },
            Service::Pdb => GemproError::PdbStatus { status, message },
        }
    }
}

/// Blocking client with the crate's user agent and a small retry loop for
/// transient failures.
#[derive(Clone)]
pub struct ServiceClient {
    client: Client,
    service: Service,
}

impl ServiceClient {
    pub fn new(service: Service, timeout: Duration) -> Result<Self, GemproError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gempro/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| service.transport_error(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| service.transport_error(err.to_string()))?;
        Ok(Self { client, service })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn service(&self) -> Service {
        self.service
    }

    /// GET returning `None` on 404, the body text otherwise.
    pub fn get_text_optional(&self, url: &str) -> Result<Option<String>, GemproError> {
        let response = self.send_with_retries(|| self.client.get(url))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = self.handle_status(response)?;
        let text = response
            .text()
            .map_err(|err| self.service.transport_error(err.to_string()))?;
        Ok(Some(text))
    }

    pub fn get_json_optional(&self, url: &str) -> Result<Option<serde_json::Value>, GemproError> {
        let response = self.send_with_retries(|| self.client.get(url))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = self.handle_status(response)?;
        let value = response
            .json()
            .map_err(|err| self.service.transport_error(err.to_string()))?;
        Ok(Some(value))
    }

    pub fn handle_status(&self, response: Response) -> Result<Response, GemproError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "request failed".to_string());
        Err(self.service.status_error(status, message))
    }

    pub fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, GemproError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(self.service.transport_error(err.to_string()));
                }
            }
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
