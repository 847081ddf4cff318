//! Auxiliary data sent alongside a check.

use std::fmt;

use crate::error::Error;
use crate::types::attribute::digest_str;

/// Auxiliary data for policy evaluation, currently a JWT the PDP verifies and
/// exposes to conditions.
///
/// The token value is redacted in `Debug` output.
///
/// # Examples
///
/// ```
/// use arbiter::AuxData;
///
/// let aux = AuxData::jwt("eyJhbGciOi...").unwrap();
/// assert_eq!(format!("{:?}", aux), r#"AuxData { jwt: "***", key_set_id: None }"#);
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AuxData {
    token: String,
    key_set_id: Option<String>,
}

impl AuxData {
    /// Attaches a JWT, verified with the PDP's default key set.
    ///
    /// Returns `Err` if the token string is empty.
    pub fn jwt(token: impl Into<String>) -> Result<Self, Error> {
        let token = token.into();
        if token.is_empty() {
            return Err(Error::InvalidArgument("JWT must not be empty".into()));
        }
        Ok(Self {
            token,
            key_set_id: None,
        })
    }

    /// Attaches a JWT verified with the named key set.
    pub fn jwt_with_key_set(
        token: impl Into<String>,
        key_set_id: impl Into<String>,
    ) -> Result<Self, Error> {
        let mut aux = Self::jwt(token)?;
        aux.key_set_id = Some(key_set_id.into()).filter(|k| !k.is_empty());
        Ok(aux)
    }

    /// Returns the raw token string.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns the key set id, if one was given.
    pub fn key_set_id(&self) -> Option<&str> {
        self.key_set_id.as_deref()
    }

    pub(crate) fn digest_into(&self, hasher: &mut sha2::Sha256) {
        digest_str(hasher, &self.token);
        digest_str(hasher, self.key_set_id.as_deref().unwrap_or_default());
    }
}

/// Debug output redacts the token value.
impl fmt::Debug for AuxData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuxData")
            .field("jwt", &"***")
            .field("key_set_id", &self.key_set_id)
            .finish()
    }
}

impl From<&AuxData> for crate::proto::AuxData {
    fn from(a: &AuxData) -> Self {
        crate::proto::AuxData {
            jwt: Some(crate::proto::Jwt {
                token: a.token.clone(),
                key_set_id: a.key_set_id.clone().unwrap_or_default(),
            }),
        }
    }
}
