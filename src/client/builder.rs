//! Client builder for configuring connections.

use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Endpoint;

use crate::config::{CacheConfig, SessionConfig};
use crate::error::Error;
use crate::transport::grpc::MetadataInterceptor;
use crate::transport::GrpcTransport;

use super::Client;

/// Header the Cerbos playground uses to select a policy set.
const PLAYGROUND_INSTANCE_HEADER: &str = "playground-instance";

/// A builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use arbiter::Client;
///
/// # async fn example() -> Result<(), arbiter::Error> {
/// let client = Client::builder("https://cerbos.prod.internal:3593")
///     .connect_timeout(Duration::from_secs(5))
///     .max_batch_size(100)
///     .flush_interval(Duration::from_millis(2))
///     .request_timeout(Duration::from_millis(500))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    endpoint: String,
    insecure: bool,
    connect_timeout: Option<Duration>,
    playground_instance: Option<String>,
    config: SessionConfig,
}

impl ClientBuilder {
    pub(crate) fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            insecure: false,
            connect_timeout: None,
            playground_instance: None,
            config: SessionConfig::default(),
        }
    }

    /// Allow insecure (plaintext) connections to non-loopback addresses.
    ///
    /// By default, `http://` to a non-loopback address returns an error.
    /// Set this to `true` to allow it.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Targets a Cerbos playground instance.
    pub fn playground_instance(mut self, instance: impl Into<String>) -> Self {
        self.playground_instance = Some(instance.into());
        self
    }

    /// Replaces the whole session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the most checks sent in one batch.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.max_batch_size = size;
        self
    }

    /// Sets how long the first check of a batch may wait for company.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    /// Sets the deadline for each dispatch attempt.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets how many times a batch is re-sent after transient failures.
    pub fn retry_budget(mut self, retries: u32) -> Self {
        self.config.retry_budget = retries;
        self
    }

    /// Enables the decision cache.
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = Some(cache);
        self
    }

    /// Builds and connects the client.
    pub async fn build(self) -> Result<Client, Error> {
        self.config.validate()?;
        check_plaintext(&self.endpoint, self.insecure)?;

        let mut endpoint = Endpoint::from_shared(self.endpoint.clone())
            .map_err(|e| Error::InvalidArgument(format!("invalid endpoint: {}", e)))?;

        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }

        let channel = endpoint.connect().await?;

        let mut interceptor = MetadataInterceptor::default();
        if let Some(instance) = &self.playground_instance {
            interceptor = interceptor.with_header(PLAYGROUND_INSTANCE_HEADER, instance)?;
        }

        tracing::debug!(endpoint = %self.endpoint, "connected to PDP");
        Client::with_transport(
            Arc::new(GrpcTransport::with_interceptor(channel, interceptor)),
            self.config,
        )
    }
}

/// Parses the host out of the URI rather than substring matching, which would
/// accept hosts like "localhost.evil.com".
fn check_plaintext(endpoint: &str, insecure: bool) -> Result<(), Error> {
    if !endpoint.starts_with("http://") || insecure {
        return Ok(());
    }
    let uri: http::Uri = endpoint.parse().map_err(|e: http::uri::InvalidUri| {
        Error::InvalidArgument(format!("invalid endpoint URI: {}", e))
    })?;
    let host = uri.host().unwrap_or("");
    let is_loopback =
        host == "localhost" || host == "127.0.0.1" || host == "::1" || host == "[::1]";

    if !is_loopback {
        return Err(Error::InvalidArgument(format!(
            "insecure connection to non-loopback address '{}' requires \
             .insecure(true) on the builder. Use https:// for production.",
            endpoint
        )));
    }
    Ok(())
}
