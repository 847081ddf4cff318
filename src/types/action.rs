//! Action names.

use std::borrow::Borrow;
use std::fmt;

use crate::error::Error;

/// An action name such as `"read"` or `"approve"`.
///
/// Actions come from an open vocabulary defined by the policies; the only
/// local rule is that the name is non-empty. Comparison is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Action(String);

impl Action {
    /// Creates an action.
    ///
    /// Returns `Err(InvalidArgument)` if `name` is empty.
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidArgument("action must not be empty".into()));
        }
        Ok(Self(name))
    }

    /// Returns the action name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Action {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Action {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Action {
    type Error = Error;

    fn try_from(name: &str) -> Result<Self, Error> {
        Action::new(name)
    }
}

impl TryFrom<String> for Action {
    type Error = Error;

    fn try_from(name: String) -> Result<Self, Error> {
        Action::new(name)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Action {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Action::new(s).map_err(serde::de::Error::custom)
    }
}
