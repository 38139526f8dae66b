//! Explicit claim mapping
//!
//! Verified payloads are first decoded into a generic string-keyed map and
//! then mapped field by field into a fixed-shape type through [`FromClaims`].
//! A missing required field or a field of the wrong JSON type is reported as
//! a [`ClaimError`], which the decoder turns into
//! [`AuthError::PayloadMalformed`](crate::AuthError::PayloadMalformed).

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// A claim could not be mapped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    /// Required claim is absent (or `null`)
    #[error("missing required claim '{0}'")]
    Missing(String),

    /// Claim is present with an unexpected JSON type or value
    #[error("claim '{claim}' is invalid: expected {expected}")]
    Invalid {
        /// Claim name
        claim: String,
        /// What was expected
        expected: &'static str,
    },
}

impl ClaimError {
    fn invalid(claim: &str, expected: &'static str) -> Self {
        ClaimError::Invalid {
            claim: claim.to_string(),
            expected,
        }
    }
}

/// Decoded, signature-verified claim set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Wrap a decoded JSON object
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Raw claim value; `null` is treated as absent
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    /// Whether the claim is present and not `null`
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Required string claim
    pub fn required_str(&self, name: &str) -> Result<&str, ClaimError> {
        self.optional_str(name)?
            .ok_or_else(|| ClaimError::Missing(name.to_string()))
    }

    /// Optional string claim
    pub fn optional_str(&self, name: &str) -> Result<Option<&str>, ClaimError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(ClaimError::invalid(name, "a string")),
        }
    }

    /// Required integer claim
    pub fn required_i64(&self, name: &str) -> Result<i64, ClaimError> {
        self.optional_i64(name)?
            .ok_or_else(|| ClaimError::Missing(name.to_string()))
    }

    /// Optional integer claim
    pub fn optional_i64(&self, name: &str) -> Result<Option<i64>, ClaimError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| ClaimError::invalid(name, "an integer")),
            Some(_) => Err(ClaimError::invalid(name, "an integer")),
        }
    }

    /// Optional boolean claim
    ///
    /// Apple encodes some booleans as the strings `"true"` / `"false"`; both
    /// forms are accepted.
    pub fn optional_bool(&self, name: &str) -> Result<Option<bool>, ClaimError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) if s == "true" => Ok(Some(true)),
            Some(Value::String(s)) if s == "false" => Ok(Some(false)),
            Some(_) => Err(ClaimError::invalid(name, "a boolean")),
        }
    }

    /// Required timestamp in seconds since the epoch (`iat`, `exp`, ...)
    pub fn required_timestamp(&self, name: &str) -> Result<DateTime<Utc>, ClaimError> {
        let secs = self.required_i64(name)?;
        DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| ClaimError::invalid(name, "a timestamp in seconds"))
    }

    /// Required timestamp in milliseconds since the epoch
    pub fn required_millis(&self, name: &str) -> Result<DateTime<Utc>, ClaimError> {
        self.optional_millis(name)?
            .ok_or_else(|| ClaimError::Missing(name.to_string()))
    }

    /// Optional timestamp in milliseconds since the epoch
    pub fn optional_millis(&self, name: &str) -> Result<Option<DateTime<Utc>>, ClaimError> {
        self.optional_i64(name)?
            .map(|ms| {
                DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| ClaimError::invalid(name, "a timestamp in milliseconds"))
            })
            .transpose()
    }

    /// The audience as a single string
    ///
    /// `aud` may be a string or an array; for an array the first entry is
    /// returned.
    pub fn audience(&self) -> Result<&str, ClaimError> {
        self.audience_in(&[])
    }

    /// The first `aud` entry that is one of `accepted`
    ///
    /// With an empty `accepted` list this is [`Claims::audience`].
    pub fn audience_in(&self, accepted: &[String]) -> Result<&str, ClaimError> {
        let entries: Vec<&str> = match self.get("aud") {
            None => return Err(ClaimError::Missing("aud".to_string())),
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| {
                    v.as_str()
                        .ok_or_else(|| ClaimError::invalid("aud", "a string or array of strings"))
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(ClaimError::invalid("aud", "a string or array of strings")),
        };

        entries
            .into_iter()
            .find(|aud| accepted.is_empty() || accepted.iter().any(|a| a == aud))
            .ok_or_else(|| ClaimError::invalid("aud", "an accepted audience"))
    }

    /// Nested object claim
    pub fn optional_object(&self, name: &str) -> Result<Option<Claims>, ClaimError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(Claims(map.clone()))),
            Some(_) => Err(ClaimError::invalid(name, "an object")),
        }
    }

    /// Optional string claim, owned
    pub fn optional_string(&self, name: &str) -> Result<Option<String>, ClaimError> {
        Ok(self.optional_str(name)?.map(str::to_string))
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Fixed-shape result of a verified payload
pub trait FromClaims: Sized {
    /// Map the verified claim set onto `Self`
    ///
    /// # Errors
    ///
    /// Returns a [`ClaimError`] naming the first field that is missing or
    /// mistyped.
    fn from_claims(claims: &Claims) -> Result<Self, ClaimError>;
}

impl FromClaims for Claims {
    fn from_claims(claims: &Claims) -> Result<Self, ClaimError> {
        Ok(claims.clone())
    }
}
