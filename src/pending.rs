//! Caller-side handle for one submitted check.

use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::correlator::Correlator;
use crate::error::Error;
use crate::types::{CheckResult, CorrelationToken};

pub(crate) type Outcome = Result<CheckResult, Error>;

/// A check that has been submitted and will resolve exactly once.
///
/// `PendingCall` is a future: await it for the [`CheckResult`] or the typed
/// error the check failed with. Dropping it, calling [`cancel`](Self::cancel),
/// or letting [`wait_timeout`](Self::wait_timeout) expire removes the check
/// from correlation without disturbing other checks that share its batch.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use arbiter::{CheckRequest, Client, Principal, Resource};
///
/// # async fn example(client: Client) -> Result<(), arbiter::Error> {
/// let request = CheckRequest::new(
///     Principal::new("alice", ["employee"])?,
///     Resource::new("document", "doc:42")?,
///     ["read"],
/// )?;
/// let result = client
///     .check_async(request)
///     .wait_timeout(Duration::from_millis(250))
///     .await?;
/// println!("read allowed: {}", result.is_allowed("read"));
/// # Ok(())
/// # }
/// ```
#[must_use = "a PendingCall is cancelled when dropped"]
pub struct PendingCall {
    token: CorrelationToken,
    rx: Option<oneshot::Receiver<Outcome>>,
    ready: Option<Outcome>,
    correlator: Weak<Correlator>,
    done: bool,
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("token", &self.token)
            .field("done", &self.done)
            .finish()
    }
}

impl PendingCall {
    pub(crate) fn waiting(
        token: CorrelationToken,
        rx: oneshot::Receiver<Outcome>,
        correlator: Weak<Correlator>,
    ) -> Self {
        Self {
            token,
            rx: Some(rx),
            ready: None,
            correlator,
            done: false,
        }
    }

    /// A call that resolved at submission: a cache hit or a closed session.
    pub(crate) fn ready(token: CorrelationToken, outcome: Outcome) -> Self {
        Self {
            token,
            rx: None,
            ready: Some(outcome),
            correlator: Weak::new(),
            done: false,
        }
    }

    /// The correlation token assigned at submission.
    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    /// Withdraws the check.
    ///
    /// Returns `true` if the call was still outstanding; awaiting it afterwards
    /// yields [`Error::Cancelled`]. Returns `false` if a result had already
    /// been delivered, in which case awaiting still yields that result.
    pub fn cancel(&mut self) -> bool {
        if self.done || self.ready.is_some() {
            return false;
        }
        let removed = self
            .correlator
            .upgrade()
            .is_some_and(|correlator| correlator.cancel(self.token));
        if removed {
            self.rx = None;
            self.ready = Some(Err(Error::Cancelled));
        }
        removed
    }

    /// Waits at most `timeout` for the result.
    ///
    /// On expiry the check is cancelled and [`Error::Timeout`] is returned.
    pub async fn wait_timeout(mut self, timeout: Duration) -> Result<CheckResult, Error> {
        match tokio::time::timeout(timeout, &mut self).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.cancel();
                Err(Error::Timeout(timeout))
            }
        }
    }
}

impl Future for PendingCall {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.ready.take() {
            this.done = true;
            return Poll::Ready(outcome);
        }
        let Some(rx) = this.rx.as_mut() else {
            this.done = true;
            return Poll::Ready(Err(Error::Cancelled));
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(received) => {
                this.done = true;
                this.rx = None;
                Poll::Ready(received.unwrap_or(Err(Error::Cancelled)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.done && self.rx.is_some() {
            if let Some(correlator) = self.correlator.upgrade() {
                correlator.cancel(self.token);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, Decision};

    #[tokio::test]
    async fn ready_call_resolves_immediately() {
        let result = CheckResult::from_decisions([(Action::new("read").unwrap(), Decision::Allow)]);
        let call = PendingCall::ready(CorrelationToken::from_raw(1), Ok(result.clone()));
        assert_eq!(call.await.unwrap(), result);
    }

    #[tokio::test]
    async fn dropped_sender_reads_as_cancelled() {
        let (tx, rx) = oneshot::channel();
        let call = PendingCall::waiting(CorrelationToken::from_raw(1), rx, Weak::new());
        drop(tx);
        assert_eq!(call.await.unwrap_err(), Error::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_expires() {
        let (_tx, rx) = oneshot::channel();
        let call = PendingCall::waiting(CorrelationToken::from_raw(1), rx, Weak::new());
        let err = call.wait_timeout(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, Error::Timeout(Duration::from_millis(20)));
    }

    #[test]
    fn cancel_after_resolution_is_a_no_op() {
        let mut call = PendingCall::ready(CorrelationToken::from_raw(1), Ok(CheckResult::default()));
        assert!(!call.cancel());
    }
}
