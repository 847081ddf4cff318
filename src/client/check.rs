//! The check request builder.

use std::time::Duration;

use crate::error::Error;
use crate::types::{AuxData, CheckRequest, CheckResult, Principal, Resource};

use super::Client;

/// Builder for a single check, created by [`Client::check`].
///
/// Resolves to a [`CheckResult`] when awaited. Validation happens on await:
/// no actions, or the same action twice, fails with
/// [`Error::InvalidArgument`] before anything is queued.
pub struct CheckBuilder<'a> {
    client: &'a Client,
    principal: &'a Principal,
    resource: &'a Resource,
    actions: Vec<String>,
    aux_data: Option<AuxData>,
    timeout: Option<Duration>,
}

impl<'a> CheckBuilder<'a> {
    pub(crate) fn new(client: &'a Client, principal: &'a Principal, resource: &'a Resource) -> Self {
        Self {
            client,
            principal,
            resource,
            actions: Vec::new(),
            aux_data: None,
            timeout: None,
        }
    }

    /// Adds one action to check.
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    /// Adds several actions to check.
    pub fn actions<I, A>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.actions.extend(actions.into_iter().map(Into::into));
        self
    }

    /// Attaches a JWT for the PDP to verify and expose to policies.
    pub fn aux_data(mut self, aux_data: AuxData) -> Self {
        self.aux_data = Some(aux_data);
        self
    }

    /// Stops waiting after `timeout`, failing with [`Error::Timeout`].
    ///
    /// The check is withdrawn from its batch if that batch has not been sent.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<'a> std::future::IntoFuture for CheckBuilder<'a> {
    type Output = Result<CheckResult, Error>;
    type IntoFuture =
        std::pin::Pin<Box<dyn std::future::Future<Output = Self::Output> + Send + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let mut request =
                CheckRequest::new(self.principal.clone(), self.resource.clone(), self.actions)?;
            if let Some(aux_data) = self.aux_data {
                request = request.with_aux_data(aux_data);
            }
            let pending = self.client.check_async(request);
            match self.timeout {
                Some(timeout) => pending.wait_timeout(timeout).await,
                None => pending.await,
            }
        })
    }
}
