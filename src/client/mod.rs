//! Cerbos client implementation.

mod builder;
mod check;

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tonic::transport::Channel;

pub use builder::ClientBuilder;
pub use check::CheckBuilder;

use crate::batcher::Batcher;
use crate::cache::DecisionCache;
use crate::config::SessionConfig;
use crate::correlator::Correlator;
use crate::error::Error;
use crate::pending::PendingCall;
use crate::session::{Session, SessionState};
use crate::stats::{Stats, StatsSnapshot};
use crate::transport::{GrpcTransport, Transport};
use crate::types::{CheckRequest, CheckResult, Principal, Resource};

struct Inner {
    batcher: Arc<Batcher>,
    session: Arc<Session>,
    stats: Arc<Stats>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.batcher.flush();
    }
}

/// An idiomatic Rust client for the Cerbos PDP.
///
/// Every check is queued into a shared batch and sent together with the
/// checks other tasks submit around the same time; results are matched back
/// to their callers individually. `Client` is cheap to clone: clones share
/// one session, one batch queue and one decision cache.
///
/// # Examples
///
/// ```rust,no_run
/// use arbiter::{Client, Principal, Resource};
///
/// # async fn example() -> Result<(), arbiter::Error> {
/// let client = Client::new("http://localhost:3593").await?;
///
/// let alice = Principal::builder("alice")
///     .role("employee")
///     .attr("department", "marketing")
///     .build()?;
/// let doc = Resource::builder("document", "doc:42")
///     .attr("owner", "alice")
///     .build()?;
///
/// let result = client
///     .check(&alice, &doc)
///     .actions(["read", "write", "delete"])
///     .await?;
/// assert!(result.is_allowed("read"));
///
/// // Clone is cheap: share across tasks
/// let client2 = client.clone();
/// tokio::spawn(async move {
///     let _ = client2.is_allowed(&alice, &doc, "read").await;
/// });
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Client {
    /// Creates a new client connected to the given Cerbos endpoint with the
    /// default [`SessionConfig`].
    ///
    /// For `http://` endpoints, only loopback addresses are allowed unless
    /// you use [`Client::builder`] with `.insecure(true)`.
    pub async fn new(endpoint: impl Into<String>) -> Result<Self, Error> {
        ClientBuilder::new(endpoint).build().await
    }

    /// Creates a builder for configuring a client connection.
    pub fn builder(endpoint: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(endpoint)
    }

    /// Creates a client from a pre-built tonic `Channel`.
    ///
    /// Use this for advanced TLS configurations (custom CA certs,
    /// client certificates, mTLS, etc.). Must be called from within a Tokio
    /// runtime.
    pub fn from_channel(channel: Channel, config: SessionConfig) -> Result<Self, Error> {
        Self::with_transport(Arc::new(GrpcTransport::new(channel)), config)
    }

    /// Creates a client that dispatches through any [`Transport`].
    ///
    /// Must be called from within a Tokio runtime; background work (flush
    /// timers, dispatch and retries) runs on that runtime.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Result<Self, Error> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|_| {
            Error::InvalidArgument("a client must be created inside a Tokio runtime".into())
        })?;
        let cache = config.cache.as_ref().map(|c| Arc::new(DecisionCache::new(c)));
        let stats = Arc::new(Stats::default());
        let correlator = Correlator::new(cache.clone());
        let session = Session::new(
            transport,
            Arc::clone(&correlator),
            Arc::clone(&stats),
            &config,
            &handle,
        );
        let batcher = Batcher::new(
            correlator,
            Arc::clone(&session),
            cache,
            Arc::clone(&stats),
            &config,
            handle,
        );
        tracing::debug!(
            max_batch_size = config.max_batch_size,
            flush_interval = ?config.flush_interval,
            cache = config.cache.is_some(),
            "client created"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                batcher,
                session,
                stats,
            }),
        })
    }

    /// Starts a check of `principal` against `resource`.
    ///
    /// Add actions with [`CheckBuilder::actions`] and `.await` the builder.
    pub fn check<'a>(&'a self, principal: &'a Principal, resource: &'a Resource) -> CheckBuilder<'a> {
        CheckBuilder::new(self, principal, resource)
    }

    /// Queues a validated request and returns its pending result.
    ///
    /// Returns without waiting on the network. The call resolves exactly once:
    /// with the result, or with the error that ended it.
    pub fn check_async(&self, request: CheckRequest) -> PendingCall {
        self.inner.batcher.submit(request)
    }

    /// Blocks the current thread until `request` is answered or `timeout`
    /// elapses.
    ///
    /// For synchronous callers. Requires the client to run on a multi-thread
    /// Tokio runtime, and must not be called from inside an async context.
    pub fn check_blocking(&self, request: CheckRequest, timeout: Duration) -> Result<CheckResult, Error> {
        if Handle::try_current().is_ok() {
            return Err(Error::InvalidArgument(
                "check_blocking cannot be called from within an async runtime; use check_async".into(),
            ));
        }
        let runtime = self.inner.batcher.runtime();
        if runtime.runtime_flavor() == RuntimeFlavor::CurrentThread {
            return Err(Error::InvalidArgument(
                "check_blocking requires a client built on a multi-thread runtime".into(),
            ));
        }
        let pending = self.check_async(request);
        runtime.block_on(pending.wait_timeout(timeout))
    }

    /// Checks several resources for one principal.
    ///
    /// Each entry becomes its own request in the shared batch. Results are
    /// returned in entry order; the first failure is returned instead and the
    /// remaining checks are cancelled.
    pub async fn check_resources<I, A>(
        &self,
        principal: &Principal,
        entries: impl IntoIterator<Item = (Resource, I)>,
    ) -> Result<Vec<CheckResult>, Error>
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let requests = entries
            .into_iter()
            .map(|(resource, actions)| CheckRequest::new(principal.clone(), resource, actions))
            .collect::<Result<Vec<_>, _>>()?;
        let calls: Vec<PendingCall> = requests.into_iter().map(|r| self.check_async(r)).collect();
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(call.await?);
        }
        Ok(results)
    }

    /// Returns `true` only if `action` is explicitly allowed.
    pub async fn is_allowed(
        &self,
        principal: &Principal,
        resource: &Resource,
        action: &str,
    ) -> Result<bool, Error> {
        let result = self.check(principal, resource).action(action).await?;
        Ok(result.is_allowed(action))
    }

    /// Dispatches the open batch without waiting for the flush interval.
    pub fn flush(&self) {
        self.inner.batcher.flush();
    }

    /// Closes the session.
    ///
    /// Every outstanding check fails with [`Error::SessionClosed`], as does
    /// every later one. Build a new client to continue.
    pub fn close(&self) {
        self.inner.session.close("closed by caller");
        self.inner.batcher.flush();
    }

    /// The current session state.
    pub fn state(&self) -> SessionState {
        self.inner.session.state()
    }

    /// Notifies on every session state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.session.subscribe()
    }

    /// A snapshot of the client's counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use crate::types::Decision;

    fn alice() -> Principal {
        Principal::new("alice", ["employee"]).unwrap()
    }

    fn doc() -> Resource {
        Resource::new("document", "doc:42").unwrap()
    }

    #[test]
    fn requires_a_runtime() {
        let err = Client::with_transport(
            Arc::new(InMemoryTransport::constant(Decision::Allow)),
            SessionConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let err = Client::with_transport(
            Arc::new(InMemoryTransport::constant(Decision::Allow)),
            SessionConfig::default().with_max_batch_size(0),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn check_resources_keeps_entry_order() {
        let transport = Arc::new(InMemoryTransport::new(|request| {
            let decision = if request.resource().id() == "doc:2" {
                Decision::Deny
            } else {
                Decision::Allow
            };
            Ok(CheckResult::from_decisions(
                request.actions().iter().map(|a| (a.clone(), decision)),
            ))
        }));
        let client = Client::with_transport(transport.clone(), SessionConfig::default()).unwrap();
        let results = client
            .check_resources(
                &alice(),
                [
                    (Resource::new("document", "doc:1").unwrap(), vec!["read"]),
                    (Resource::new("document", "doc:2").unwrap(), vec!["read"]),
                    (Resource::new("document", "doc:3").unwrap(), vec!["read"]),
                ],
            )
            .await
            .unwrap();
        let allowed: Vec<_> = results.iter().map(|r| r.is_allowed("read")).collect();
        assert_eq!(allowed, [true, false, true]);
        assert_eq!(transport.batch_count(), 1);
    }

    #[tokio::test]
    async fn check_resources_validates_before_queueing() {
        let transport = Arc::new(InMemoryTransport::constant(Decision::Allow));
        let client = Client::with_transport(transport.clone(), SessionConfig::default()).unwrap();
        let err = client
            .check_resources(
                &alice(),
                [
                    (doc(), vec!["read"]),
                    (Resource::new("document", "doc:43").unwrap(), vec![]),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        client.flush();
        tokio::task::yield_now().await;
        assert_eq!(transport.batch_count(), 0);
    }

    #[tokio::test]
    async fn is_allowed_treats_anything_but_allow_as_deny() {
        let client = Client::with_transport(
            Arc::new(InMemoryTransport::constant(Decision::Deny)),
            SessionConfig::default(),
        )
        .unwrap();
        assert!(!client.is_allowed(&alice(), &doc(), "read").await.unwrap());
    }

    #[tokio::test]
    async fn close_fails_outstanding_and_later_checks() {
        let client = Client::with_transport(
            Arc::new(InMemoryTransport::constant(Decision::Allow)),
            SessionConfig::default().with_flush_interval(Duration::from_secs(60)),
        )
        .unwrap();
        let request = CheckRequest::new(alice(), doc(), ["read"]).unwrap();
        let outstanding = client.check_async(request.clone());
        client.close();
        assert!(matches!(outstanding.await, Err(Error::SessionClosed { .. })));
        assert!(matches!(
            client.check_async(request).await,
            Err(Error::SessionClosed { .. })
        ));
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[test]
    fn check_blocking_from_sync_code() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let client = runtime
            .block_on(async {
                Client::with_transport(
                    Arc::new(InMemoryTransport::constant(Decision::Allow)),
                    SessionConfig::default(),
                )
            })
            .unwrap();
        let request = CheckRequest::new(alice(), doc(), ["read"]).unwrap();
        let result = client
            .check_blocking(request, Duration::from_secs(5))
            .unwrap();
        assert!(result.is_allowed("read"));
    }

    #[test]
    fn check_blocking_refuses_current_thread_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let client = runtime
            .block_on(async {
                Client::with_transport(
                    Arc::new(InMemoryTransport::constant(Decision::Allow)),
                    SessionConfig::default(),
                )
            })
            .unwrap();
        let request = CheckRequest::new(alice(), doc(), ["read"]).unwrap();
        let err = client
            .check_blocking(request, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(msg) if msg.contains("multi-thread")));
    }

    #[tokio::test]
    async fn check_blocking_refuses_async_context() {
        let client = Client::with_transport(
            Arc::new(InMemoryTransport::constant(Decision::Allow)),
            SessionConfig::default(),
        )
        .unwrap();
        let request = CheckRequest::new(alice(), doc(), ["read"]).unwrap();
        let err = client
            .check_blocking(request, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
