use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use tracing::{debug, instrument, warn};

use pulse_core::errors::{ConfigError, RemoteError};
use pulse_core::remote::{RemoteClient, RemoteConnector};
use pulse_core::security::{ApiKey, Credentials, DeviceIdentity};
use pulse_core::types::DataPoint;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeouts applied to every request of an [`HttpRemote`].
#[derive(Clone, Copy, Debug)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            request: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// HTTP adapter for the remote stream service.
///
/// Every request carries HTTP Basic credentials `owner/device:api_key`.
/// Stream routes live under `{server}/streams/{owner}/{device}/{stream}`.
pub struct HttpRemote {
    client: Client,
    base: Url,
    identity: DeviceIdentity,
    api_key: ApiKey,
    timeouts: HttpTimeouts,
}

impl HttpRemote {
    pub fn new(credentials: &Credentials, timeouts: HttpTimeouts) -> Result<Self, ConfigError> {
        let base = parse_server(&credentials.server)?;
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            base,
            identity: credentials.identity.clone(),
            api_key: credentials.api_key.clone(),
            timeouts,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidRequest(format!("cannot extend {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn stream_url(&self, stream: &str) -> Result<Url, RemoteError> {
        self.url(&["streams", &self.identity.owner, &self.identity.device, stream])
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.basic_auth(self.identity.to_string(), Some(self.api_key.expose()))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, RemoteError> {
        self.authorized(req).send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(self.timeouts.request)
            } else {
                RemoteError::Network(e.to_string())
            }
        })
    }

    async fn expect_success(resp: Response) -> Result<(), RemoteError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status.as_u16(), body))
    }
}

#[async_trait]
impl RemoteClient for HttpRemote {
    #[instrument(skip(self), fields(identity = %self.identity))]
    async fn ping(&self) -> Result<(), RemoteError> {
        let url = self.url(&["liveness"])?;
        let resp = self.send(self.client.get(url)).await?;
        Self::expect_success(resp).await
    }

    #[instrument(skip(self))]
    async fn stream_exists(&self, stream: &str) -> Result<bool, RemoteError> {
        let url = self.stream_url(stream)?;
        let resp = self.send(self.client.get(url)).await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(true);
        }
        match status.as_u16() {
            401 | 403 => Err(RemoteError::from_status(
                status.as_u16(),
                resp.text().await.unwrap_or_default(),
            )),
            400..=499 => {
                debug!(stream, status = status.as_u16(), "stream missing remotely");
                Ok(false)
            }
            code => Err(RemoteError::from_status(
                code,
                resp.text().await.unwrap_or_default(),
            )),
        }
    }

    #[instrument(skip(self, schema))]
    async fn create_stream(&self, stream: &str, schema: &str) -> Result<(), RemoteError> {
        let url = self.stream_url(stream)?;
        let req = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .body(schema.to_string());
        let resp = self.send(req).await?;
        Self::expect_success(resp).await.inspect_err(|e| {
            warn!(stream, error = %e, "create stream rejected");
        })
    }

    #[instrument(skip(self, points), fields(points = points.len()))]
    async fn insert_batch(&self, stream: &str, points: &[DataPoint]) -> Result<(), RemoteError> {
        let url = self.stream_url(stream)?;
        let resp = self.send(self.client.put(url).json(points)).await?;
        Self::expect_success(resp).await
    }
}

/// Builds [`HttpRemote`] clients with fixed timeouts.
#[derive(Clone, Debug, Default)]
pub struct HttpConnector {
    timeouts: HttpTimeouts,
}

impl HttpConnector {
    pub fn new(timeouts: HttpTimeouts) -> Self {
        Self { timeouts }
    }
}

impl RemoteConnector for HttpConnector {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn RemoteClient>, ConfigError> {
        Ok(Arc::new(HttpRemote::new(credentials, self.timeouts)?))
    }
}

fn parse_server(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidServerUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("not a base url"));
    }
    Ok(url)
}
