//! Server-to-server calls to the Apple ID token endpoints
//!
//! Each request is authenticated with a freshly minted client assertion as
//! `client_secret`. Used to exchange authorization codes at sign-in, confirm
//! an account is still authorised (refresh), and revoke tokens when an
//! account is deleted.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientAssertionConfig;
use crate::error::{AuthError, AuthResult};
use crate::jwt::ClientAssertionIssuer;
use crate::jwt::key_store::is_secure_endpoint;

/// Successful `/auth/token` response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    /// Access token (opaque)
    pub access_token: String,
    /// Token type, `Bearer`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Refresh token (code exchange only)
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Identity token (code exchange only)
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Which kind of token is being revoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTypeHint {
    /// An access token
    AccessToken,
    /// A refresh token
    RefreshToken,
}

impl TokenTypeHint {
    /// Wire value
    pub fn as_str(self) -> &'static str {
        match self {
            TokenTypeHint::AccessToken => "access_token",
            TokenTypeHint::RefreshToken => "refresh_token",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: String,
}

/// Apple ID token endpoint client
#[derive(Debug, Clone)]
pub struct AppleIdClient {
    http_client: reqwest::Client,
    token_url: Url,
    revoke_url: Url,
    assertion: Arc<ClientAssertionIssuer>,
}

impl AppleIdClient {
    /// Create a client for `base_url` (e.g. `https://appleid.apple.com`)
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the URL is invalid or not
    /// HTTPS, or the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        assertion: Arc<ClientAssertionIssuer>,
        timeout: Duration,
    ) -> AuthResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| AuthError::config(format!("Invalid provider URL '{base_url}': {e}")))?;
        if !is_secure_endpoint(&base) {
            return Err(AuthError::config(
                "Provider URL must use HTTPS (HTTP only allowed for loopback hosts)",
            ));
        }

        let join = |path: &str| {
            base.join(path)
                .map_err(|e| AuthError::config(format!("Invalid provider endpoint {path}: {e}")))
        };
        let token_url = join("/auth/token")?;
        let revoke_url = join("/auth/revoke")?;

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            token_url,
            revoke_url,
            assertion,
        })
    }

    /// Create a client from client assertion configuration
    ///
    /// # Errors
    ///
    /// As [`AppleIdClient::new`].
    pub fn from_config(
        config: &ClientAssertionConfig,
        assertion: Arc<ClientAssertionIssuer>,
    ) -> AuthResult<Self> {
        Self::new(&config.provider_url, assertion, config.request_timeout)
    }

    /// Exchange an authorization code for tokens
    ///
    /// # Errors
    ///
    /// [`AuthError::UpstreamUnavailable`] on transport failure,
    /// [`AuthError::ProviderRejected`] on a non-success response.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> AuthResult<TokenResponse> {
        let mut form = vec![("grant_type", "authorization_code"), ("code", code)];
        if let Some(redirect_uri) = redirect_uri {
            form.push(("redirect_uri", redirect_uri));
        }
        self.request_tokens(&form).await
    }

    /// Obtain a new access token with a refresh token
    ///
    /// # Errors
    ///
    /// As [`AppleIdClient::exchange_code`]. A revoked authorisation answers
    /// with `ProviderRejected { error: "invalid_grant", .. }`.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenResponse> {
        self.request_tokens(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    /// Revoke an access or refresh token
    ///
    /// # Errors
    ///
    /// As [`AppleIdClient::exchange_code`].
    pub async fn revoke(&self, token: &str, hint: TokenTypeHint) -> AuthResult<()> {
        self.post_form(
            &self.revoke_url,
            &[("token", token), ("token_type_hint", hint.as_str())],
        )
        .await?;
        debug!(hint = hint.as_str(), "Token revoked");
        Ok(())
    }

    async fn request_tokens(&self, form: &[(&str, &str)]) -> AuthResult<TokenResponse> {
        let response = self.post_form(&self.token_url, form).await?;
        response.json::<TokenResponse>().await.map_err(|e| {
            warn!(error = %e, "Failed to parse token response");
            AuthError::UpstreamUnavailable(format!("Invalid token response: {e}"))
        })
    }

    async fn post_form(&self, url: &Url, form: &[(&str, &str)]) -> AuthResult<reqwest::Response> {
        let client_secret = self.assertion.issue()?;
        let mut form_data = vec![
            ("client_id", self.assertion.client_id()),
            ("client_secret", client_secret.as_str()),
        ];
        form_data.extend_from_slice(form);

        let response = self
            .http_client
            .post(url.clone())
            .form(&form_data)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Apple ID request failed");
                AuthError::UpstreamUnavailable(format!("Apple ID request failed: {e}"))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = serde_json::from_str::<ProviderErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_else(|_| "unknown_error".to_string());
        warn!(url = %url, status = %status, error = %error, "Apple ID request rejected");

        Err(AuthError::ProviderRejected {
            status: status.as_u16(),
            error,
        })
    }
}
