//! A single authorization question.

use std::collections::BTreeSet;

use prost::Message;
use sha2::Digest;

use crate::error::Error;
use crate::types::{Action, AuxData, Principal, Resource};

/// May `principal` perform each of `actions` on `resource`?
///
/// Built with [`CheckRequest::new`], which validates the action set:
/// it must be non-empty and must not name the same action twice
/// (case-sensitive). Principal and resource are validated by their own
/// builders.
///
/// # Examples
///
/// ```
/// use arbiter::{CheckRequest, Principal, Resource};
///
/// let request = CheckRequest::new(
///     Principal::new("alice", ["employee"]).unwrap(),
///     Resource::new("document", "doc:42").unwrap(),
///     ["read", "write", "delete"],
/// )
/// .unwrap();
/// assert_eq!(request.actions().len(), 3);
///
/// let dup = CheckRequest::new(
///     Principal::new("alice", ["employee"]).unwrap(),
///     Resource::new("document", "doc:42").unwrap(),
///     ["read", "read"],
/// );
/// assert!(dup.is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRequest {
    principal: Principal,
    resource: Resource,
    actions: Vec<Action>,
    aux_data: Option<AuxData>,
}

impl CheckRequest {
    /// Validates the actions and assembles a request.
    pub fn new<I, A>(principal: Principal, resource: Resource, actions: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let actions = actions
            .into_iter()
            .map(Action::new)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_actions(principal, resource, actions)
    }

    /// Assembles a request from already-constructed actions.
    pub fn from_actions(
        principal: Principal,
        resource: Resource,
        actions: Vec<Action>,
    ) -> Result<Self, Error> {
        if actions.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "no actions given for resource {}:{}",
                resource.kind(),
                resource.id()
            )));
        }
        let mut seen = BTreeSet::new();
        for action in &actions {
            if !seen.insert(action.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate action '{action}'"
                )));
            }
        }
        Ok(Self {
            principal,
            resource,
            actions,
            aux_data: None,
        })
    }

    /// Attaches auxiliary data (a JWT) to this request.
    pub fn with_aux_data(mut self, aux_data: AuxData) -> Self {
        self.aux_data = Some(aux_data);
        self
    }

    /// Returns the principal.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Returns the resource.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Returns the actions, in the order given.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Returns the auxiliary data, if any.
    pub fn aux_data(&self) -> Option<&AuxData> {
        self.aux_data.as_ref()
    }

    /// A copy of this request restricted to the actions `keep` accepts.
    pub(crate) fn retain_actions(&self, keep: impl Fn(&Action) -> bool) -> Self {
        Self {
            principal: self.principal.clone(),
            resource: self.resource.clone(),
            actions: self.actions.iter().filter(|a| keep(a)).cloned().collect(),
            aux_data: self.aux_data.clone(),
        }
    }

    /// Requests with equal keys can share one `CheckResources` call.
    pub(crate) fn group_key(&self) -> [u8; 32] {
        let mut hasher = sha2::Sha256::new();
        self.principal.digest_into(&mut hasher);
        match &self.aux_data {
            Some(aux) => {
                hasher.update([1u8]);
                aux.digest_into(&mut hasher);
            }
            None => hasher.update([0u8]),
        }
        hasher.finalize().into()
    }

    pub(crate) fn to_resource_entry(&self) -> crate::proto::ResourceEntry {
        crate::proto::ResourceEntry {
            actions: self.actions.iter().map(|a| a.as_str().to_string()).collect(),
            resource: Some((&self.resource).into()),
        }
    }

    /// Upper bound of this request's share of an encoded `CheckResources` call.
    pub(crate) fn estimated_size(&self) -> usize {
        let principal: crate::proto::Principal = (&self.principal).into();
        let aux = self
            .aux_data
            .as_ref()
            .map_or(0, |a| crate::proto::AuxData::from(a).encoded_len());
        self.to_resource_entry().encoded_len() + principal.encoded_len() + aux
    }
}
