//! reqwest implementation of [`AuthService`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use f2f_crypto::PublicKey;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::remote::{
    ApiResponse, AuthService, DeviceInfo, RefreshRequest, ServiceFactory, TransportError,
};
use crate::session::BearerToken;

/// Header the backend reads the bearer token from.
pub const TOKEN_HEADER: &str = "Authentication";

#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    /// Shorter timeout for liveness probes.
    pub ack_timeout: Duration,
    /// Extra trust root (PEM) for self-signed backends.
    pub ca_cert_pem: Option<Vec<u8>>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(3),
            ca_cert_pem: None,
        }
    }
}

fn build_client(timeout: Duration, ca: Option<&reqwest::Certificate>) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder().use_rustls_tls().timeout(timeout);
    if let Some(cert) = ca {
        builder = builder.add_root_certificate(cert.clone());
    }
    builder.build().map_err(|e| TransportError::Tls(e.to_string()))
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_body() || e.is_decode() {
        TransportError::Body(e.to_string())
    } else {
        TransportError::Http(e.to_string())
    }
}

/// Client for one backend base URL.
#[derive(Clone)]
pub struct HttpAuthService {
    base: Url,
    client: reqwest::Client,
}

impl HttpAuthService {
    pub fn new(base_url: &str, config: &HttpClientConfig) -> Result<Self, TransportError> {
        let ca = config
            .ca_cert_pem
            .as_deref()
            .map(reqwest::Certificate::from_pem)
            .transpose()
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        Self::with_client(base_url, build_client(config.timeout, ca.as_ref())?)
    }

    pub fn with_client(base_url: &str, client: reqwest::Client) -> Result<Self, TransportError> {
        let invalid = |reason: String| TransportError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };
        let mut base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", base.scheme())));
        }
        // Relative joins replace the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, route: &str) -> Result<Url, TransportError> {
        self.base
            .join(route)
            .map_err(|e| TransportError::InvalidUrl {
                url: format!("{}{route}", self.base),
                reason: e.to_string(),
            })
    }

    async fn read(request: reqwest::RequestBuilder) -> Result<ApiResponse<String>, TransportError> {
        let response = request.send().await.map_err(map_reqwest)?;
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest)?;
        let trimmed = body.trim();

        if !status.is_success() {
            let message = if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("error").to_string()
            } else {
                trimmed.to_string()
            };
            tracing::debug!(status = status.as_u16(), message = %message, "backend error");
            return Ok(ApiResponse::Error {
                status: status.as_u16(),
                message,
            });
        }
        if status == StatusCode::NO_CONTENT || trimmed.is_empty() {
            return Ok(ApiResponse::Empty);
        }
        Ok(ApiResponse::Success(trimmed.to_string()))
    }

    async fn read_json<T: DeserializeOwned>(
        request: reqwest::RequestBuilder,
    ) -> Result<ApiResponse<T>, TransportError> {
        Self::read(request).await?.try_map(|body| {
            serde_json::from_str(&body).map_err(|e| TransportError::Body(e.to_string()))
        })
    }
}

#[async_trait]
impl AuthService for HttpAuthService {
    async fn ack(&self) -> Result<ApiResponse<()>, TransportError> {
        let request = self.client.get(self.endpoint("ack")?);
        Ok(match Self::read(request).await? {
            ApiResponse::Success(_) => ApiResponse::Success(()),
            ApiResponse::Empty => ApiResponse::Empty,
            ApiResponse::Error { status, message } => ApiResponse::Error { status, message },
        })
    }

    async fn provision(&self) -> Result<ApiResponse<DeviceInfo>, TransportError> {
        Self::read_json(self.client.post(self.endpoint("provision")?)).await
    }

    async fn finalize_provision(
        &self,
        name: &str,
        public_key: &PublicKey,
    ) -> Result<ApiResponse<DeviceInfo>, TransportError> {
        let request = self
            .client
            .post(self.endpoint("provision/finalize")?)
            .query(&[("name", name.to_string()), ("pk", public_key.to_base64())]);
        Self::read_json(request).await
    }

    async fn get_device(&self, name: &str) -> Result<ApiResponse<DeviceInfo>, TransportError> {
        let request = self
            .client
            .get(self.endpoint("devices")?)
            .query(&[("name", name)]);
        Self::read_json(request).await
    }

    async fn refresh_token(
        &self,
        request: &RefreshRequest,
    ) -> Result<ApiResponse<BearerToken>, TransportError> {
        let http = self
            .client
            .get(self.endpoint("refresh")?)
            .query(&request.query_pairs());
        Ok(match Self::read(http).await? {
            ApiResponse::Success(token) => ApiResponse::Success(BearerToken::new(token)),
            ApiResponse::Empty => ApiResponse::Empty,
            ApiResponse::Error { status, message } => ApiResponse::Error { status, message },
        })
    }

    async fn authenticated_probe(
        &self,
        token: &BearerToken,
    ) -> Result<ApiResponse<String>, TransportError> {
        let request = self
            .client
            .get(self.endpoint("test")?)
            .header(TOKEN_HEADER, token.expose());
        Self::read(request).await
    }
}

/// Builds [`HttpAuthService`]s that share two connection pools: one with the
/// normal timeout and one with the short ack timeout.
#[derive(Clone)]
pub struct HttpServiceFactory {
    client: reqwest::Client,
    ack_client: reqwest::Client,
}

impl HttpServiceFactory {
    pub fn new(config: &HttpClientConfig) -> Result<Self, TransportError> {
        let ca = config
            .ca_cert_pem
            .as_deref()
            .map(reqwest::Certificate::from_pem)
            .transpose()
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        Ok(Self {
            client: build_client(config.timeout, ca.as_ref())?,
            ack_client: build_client(config.ack_timeout, ca.as_ref())?,
        })
    }
}

impl ServiceFactory for HttpServiceFactory {
    fn service(&self, server_url: &str) -> Result<Arc<dyn AuthService>, TransportError> {
        Ok(Arc::new(HttpAuthService::with_client(
            server_url,
            self.client.clone(),
        )?))
    }

    fn ack_service(&self, server_url: &str) -> Result<Arc<dyn AuthService>, TransportError> {
        Ok(Arc::new(HttpAuthService::with_client(
            server_url,
            self.ack_client.clone(),
        )?))
    }
}
