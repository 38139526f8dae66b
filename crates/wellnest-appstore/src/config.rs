//! App binding for signed App Store data

use serde::{Deserialize, Serialize};
use wellnest_trust::{AuthError, AuthResult, ValidationTime};

use crate::models::Environment;

/// Which app and environment verified payloads must belong to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStoreConfig {
    /// Expected `bundleId`
    pub bundle_id: String,

    /// Expected `environment`
    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// Expected `appAppleId` of production notifications
    #[serde(default)]
    pub app_apple_id: Option<i64>,

    /// Evaluate certificate validity at the wall clock instead of the
    /// payload's `signedDate`
    #[serde(default)]
    pub validate_chain_at_now: bool,
}

impl AppStoreConfig {
    /// Bind to `bundle_id` in production
    pub fn new(bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            environment: default_environment(),
            app_apple_id: None,
            validate_chain_at_now: false,
        }
    }

    /// Set the expected environment
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set the expected app Apple id
    pub fn with_app_apple_id(mut self, app_apple_id: i64) -> Self {
        self.app_apple_id = Some(app_apple_id);
        self
    }

    /// Evaluate certificate validity at the wall clock
    pub fn with_validation_at_now(mut self, enabled: bool) -> Self {
        self.validate_chain_at_now = enabled;
        self
    }

    /// Instant at which chains are validated
    pub fn validation_time(&self) -> ValidationTime {
        if self.validate_chain_at_now {
            ValidationTime::Now
        } else {
            ValidationTime::SignedDate
        }
    }

    /// Load from `APPSTORE_*` environment variables
    ///
    /// # Errors
    ///
    /// See [`AppStoreConfig::from_lookup`].
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any variable lookup
    ///
    /// `APPSTORE_BUNDLE_ID` is required; `APPSTORE_ENVIRONMENT` defaults to
    /// `Production`; `APPSTORE_APP_APPLE_ID` is optional.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] for a missing bundle id, an
    /// unknown environment or a non-numeric app Apple id.
    pub fn from_lookup<F>(lookup: F) -> AuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bundle_id = get("APPSTORE_BUNDLE_ID").ok_or_else(|| {
            AuthError::Configuration("APPSTORE_BUNDLE_ID must be set".to_string())
        })?;

        let environment = match get("APPSTORE_ENVIRONMENT") {
            Some(value) => Environment::parse_config(&value).ok_or_else(|| {
                AuthError::Configuration(format!(
                    "APPSTORE_ENVIRONMENT must be one of Sandbox, Production, Xcode, LocalTesting, got '{value}'"
                ))
            })?,
            None => default_environment(),
        };

        let app_apple_id = get("APPSTORE_APP_APPLE_ID")
            .map(|value| {
                value.trim().parse::<i64>().map_err(|_| {
                    AuthError::Configuration(format!(
                        "APPSTORE_APP_APPLE_ID must be numeric, got '{value}'"
                    ))
                })
            })
            .transpose()?;

        Ok(Self {
            bundle_id: bundle_id.trim().to_string(),
            environment,
            app_apple_id,
            validate_chain_at_now: false,
        })
    }
}

fn default_environment() -> Environment {
    Environment::Production
}
