//! The principal: who is asking.

use std::collections::BTreeSet;

use crate::error::Error;
use crate::types::attribute::{attributes_to_proto, digest_attributes, digest_str};
use crate::types::{AttributeValue, Attributes};

/// The identity requesting access: a user or service with roles and attributes.
///
/// Immutable once built. Construct with [`Principal::builder`] or the
/// [`Principal::new`] shorthand.
///
/// # Examples
///
/// ```
/// use arbiter::Principal;
///
/// let alice = Principal::builder("alice")
///     .role("employee")
///     .attr("department", "marketing")
///     .attr("geography", "GB")
///     .policy_version("20210210")
///     .build()
///     .unwrap();
/// assert_eq!(alice.id(), "alice");
/// assert!(alice.roles().contains("employee"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    id: String,
    roles: BTreeSet<String>,
    attributes: Attributes,
    policy_version: Option<String>,
    scope: Option<String>,
}

impl Principal {
    /// Builds a principal with the given id and roles and no attributes.
    pub fn new<I, R>(id: impl Into<String>, roles: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self::builder(id).roles(roles).build()
    }

    /// Starts building a principal.
    pub fn builder(id: impl Into<String>) -> PrincipalBuilder {
        PrincipalBuilder {
            id: id.into(),
            roles: BTreeSet::new(),
            attributes: Attributes::new(),
            policy_version: None,
            scope: None,
        }
    }

    /// Returns the principal id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the role set, in sorted order.
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Returns the attributes, in key order.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns the policy version to evaluate against, if pinned.
    pub fn policy_version(&self) -> Option<&str> {
        self.policy_version.as_deref()
    }

    /// Returns the policy scope, if any.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub(crate) fn digest_into(&self, hasher: &mut sha2::Sha256) {
        use sha2::Digest;

        digest_str(hasher, &self.id);
        hasher.update((self.roles.len() as u64).to_be_bytes());
        for role in &self.roles {
            digest_str(hasher, role);
        }
        digest_attributes(hasher, &self.attributes);
        digest_str(hasher, self.policy_version.as_deref().unwrap_or_default());
        digest_str(hasher, self.scope.as_deref().unwrap_or_default());
    }
}

/// Fluent, validating builder for [`Principal`].
#[derive(Debug, Clone)]
pub struct PrincipalBuilder {
    id: String,
    roles: BTreeSet<String>,
    attributes: Attributes,
    policy_version: Option<String>,
    scope: Option<String>,
}

impl PrincipalBuilder {
    /// Adds a role.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Adds several roles.
    pub fn roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Sets an attribute, replacing any previous value for the key.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets several attributes.
    pub fn attrs<I, K, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttributeValue>,
    {
        self.attributes
            .extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Pins the principal policy version.
    pub fn policy_version(mut self, version: impl Into<String>) -> Self {
        self.policy_version = Some(version.into());
        self
    }

    /// Sets the principal policy scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Validates and builds the principal.
    ///
    /// Returns `Err(InvalidArgument)` if the id is empty, no role was given,
    /// or a role name is empty.
    pub fn build(self) -> Result<Principal, Error> {
        if self.id.is_empty() {
            return Err(Error::InvalidArgument("principal id must not be empty".into()));
        }
        if self.roles.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "principal '{}' must have at least one role",
                self.id
            )));
        }
        if self.roles.iter().any(String::is_empty) {
            return Err(Error::InvalidArgument("role names must not be empty".into()));
        }
        Ok(Principal {
            id: self.id,
            roles: self.roles,
            attributes: self.attributes,
            policy_version: self.policy_version.filter(|v| !v.is_empty()),
            scope: self.scope.filter(|s| !s.is_empty()),
        })
    }
}

impl From<&Principal> for crate::proto::Principal {
    fn from(p: &Principal) -> Self {
        crate::proto::Principal {
            id: p.id.clone(),
            policy_version: p.policy_version.clone().unwrap_or_default(),
            roles: p.roles.iter().cloned().collect(),
            attr: attributes_to_proto(&p.attributes),
            scope: p.scope.clone().unwrap_or_default(),
        }
    }
}
