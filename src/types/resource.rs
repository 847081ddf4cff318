//! The resource: what is being accessed.

use crate::error::Error;
use crate::types::attribute::{attributes_to_proto, digest_attributes, digest_str};
use crate::types::{AttributeValue, Attributes};

/// Id used for resources that do not exist yet.
pub const NEW_RESOURCE_ID: &str = "_NEW_";

/// The object being accessed: a kind (e.g., `"leave_request"`), an id, and
/// attributes.
///
/// Kind and id must be non-empty.
///
/// # Examples
///
/// ```
/// use arbiter::Resource;
///
/// let doc = Resource::builder("document", "doc-42")
///     .attr("owner", "alice")
///     .build()
///     .unwrap();
/// assert_eq!(doc.kind(), "document");
/// assert_eq!(doc.id(), "doc-42");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    kind: String,
    id: String,
    attributes: Attributes,
    policy_version: Option<String>,
    scope: Option<String>,
}

impl Resource {
    /// Creates a resource with the given kind and id and no attributes.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Result<Self, Error> {
        Self::builder(kind, id).build()
    }

    /// Creates a resource standing for one that has not been created yet.
    pub fn new_instance(kind: impl Into<String>) -> Result<Self, Error> {
        Self::new(kind, NEW_RESOURCE_ID)
    }

    /// Starts building a resource.
    pub fn builder(kind: impl Into<String>, id: impl Into<String>) -> ResourceBuilder {
        ResourceBuilder {
            kind: kind.into(),
            id: id.into(),
            attributes: Attributes::new(),
            policy_version: None,
            scope: None,
        }
    }

    /// Returns the resource kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the resource id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the attributes, in key order.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns the policy version hint, if any.
    pub fn policy_version(&self) -> Option<&str> {
        self.policy_version.as_deref()
    }

    /// Returns the policy scope, if any.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub(crate) fn digest_into(&self, hasher: &mut sha2::Sha256) {
        digest_str(hasher, &self.kind);
        digest_str(hasher, &self.id);
        digest_attributes(hasher, &self.attributes);
        digest_str(hasher, self.policy_version.as_deref().unwrap_or_default());
        digest_str(hasher, self.scope.as_deref().unwrap_or_default());
    }
}

/// Fluent, validating builder for [`Resource`].
#[derive(Debug, Clone)]
pub struct ResourceBuilder {
    kind: String,
    id: String,
    attributes: Attributes,
    policy_version: Option<String>,
    scope: Option<String>,
}

impl ResourceBuilder {
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

    /// Sets the policy version hint.
    pub fn policy_version(mut self, version: impl Into<String>) -> Self {
        self.policy_version = Some(version.into());
        self
    }

    /// Sets the resource policy scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Validates and builds the resource.
    ///
    /// Returns `Err(InvalidArgument)` if either `kind` or `id` is empty.
    pub fn build(self) -> Result<Resource, Error> {
        if self.kind.is_empty() {
            return Err(Error::InvalidArgument("resource kind must not be empty".into()));
        }
        if self.id.is_empty() {
            return Err(Error::InvalidArgument("resource id must not be empty".into()));
        }
        Ok(Resource {
            kind: self.kind,
            id: self.id,
            attributes: self.attributes,
            policy_version: self.policy_version.filter(|v| !v.is_empty()),
            scope: self.scope.filter(|s| !s.is_empty()),
        })
    }
}

impl From<&Resource> for crate::proto::Resource {
    fn from(r: &Resource) -> Self {
        crate::proto::Resource {
            kind: r.kind.clone(),
            policy_version: r.policy_version.clone().unwrap_or_default(),
            id: r.id.clone(),
            attr: attributes_to_proto(&r.attributes),
            scope: r.scope.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_valid() {
        let r = Resource::new("leave_request", "xx125").unwrap();
        assert_eq!(r.kind(), "leave_request");
        assert_eq!(r.id(), "xx125");
        assert!(r.attributes().is_empty());
    }

    #[test]
    fn resource_empty_kind() {
        let err = Resource::new("", "xx125").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn resource_empty_id() {
        let err = Resource::new("leave_request", "").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn new_instance_uses_placeholder_id() {
        let r = Resource::new_instance("leave_request").unwrap();
        assert_eq!(r.id(), NEW_RESOURCE_ID);
    }

    #[test]
    fn attributes_keep_caller_values() {
        let r = Resource::builder("leave_request", "xx125")
            .attr("owner", "john")
            .attr("days", 3_i64)
            .build()
            .unwrap();
        assert_eq!(r.attributes().get("owner"), Some(&AttributeValue::from("john")));
        assert_eq!(r.attributes().get("days"), Some(&AttributeValue::Number(3.0)));
    }

    #[test]
    fn proto_carries_every_field() {
        let r = Resource::builder("leave_request", "xx125")
            .attr("owner", "john")
            .policy_version("20210210")
            .scope("acme")
            .build()
            .unwrap();
        let wire: crate::proto::Resource = (&r).into();
        assert_eq!(wire.kind, "leave_request");
        assert_eq!(wire.id, "xx125");
        assert_eq!(wire.policy_version, "20210210");
        assert_eq!(wire.scope, "acme");
        assert_eq!(wire.attr.len(), 1);
    }
}
