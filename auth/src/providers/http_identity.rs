//! HTTP identity provider for Google, GitHub and Yandex.
//!
//! Performs the authorization code exchange (forwarding the PKCE verifier)
//! and maps each provider's profile payload onto [`ProviderProfile`].

use crate::config::{OAuthClientConfig, OAuthConfig};
use crate::error::{AuthError, Result};
use crate::providers::{IdentityProvider, ProviderProfile};
use crate::state::OAuthProvider;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::{Client, Response, StatusCode, header};
use serde::Deserialize;
use std::collections::HashMap;

/// HTTP identity provider.
#[derive(Clone, Debug)]
pub struct HttpIdentityProvider {
    http_client: Client,
    clients: HashMap<OAuthProvider, OAuthClientConfig>,
}

impl HttpIdentityProvider {
    /// Create a provider for the given client registrations.
    #[must_use]
    pub fn new(clients: HashMap<OAuthProvider, OAuthClientConfig>) -> Self {
        Self {
            http_client: Client::new(),
            clients,
        }
    }

    /// Create a provider from the OAuth section of the configuration.
    #[must_use]
    pub fn from_config(config: &OAuthConfig) -> Self {
        Self::new(config.clients.clone())
    }

    fn client(&self, provider: OAuthProvider) -> Result<&OAuthClientConfig> {
        self.clients.get(&provider).ok_or_else(|| {
            AuthError::Configuration(format!("OAuth provider '{provider}' is not configured"))
        })
    }

    async fn exchange_code(
        &self,
        provider: OAuthProvider,
        client: &OAuthClientConfig,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse> {
        let mut params = vec![
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
        ];
        if provider != OAuthProvider::GitHub {
            params.push(("grant_type", "authorization_code"));
        }
        if let Some(redirect_uri) = client.redirect_uri.as_deref() {
            params.push(("redirect_uri", redirect_uri));
        }

        let response = self
            .http_client
            .post(&client.token_url)
            .header(header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(transport_error)?;

        let token: TokenResponse = parse(check_status(response)?).await?;

        // GitHub answers a bad code with 200 and an error body.
        if let Some(error) = &token.error {
            tracing::warn!(provider = %provider, error = %error, "OAuth code exchange refused");
            return Err(AuthError::OAuthProviderRejected {
                status: StatusCode::BAD_REQUEST.as_u16(),
            });
        }
        Ok(token)
    }

    async fn github_profile(
        &self,
        client: &OAuthClientConfig,
        access_token: &str,
    ) -> Result<ProviderProfile> {
        let response = self
            .http_client
            .get(&client.user_data_url)
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/vnd.github.v3+json")
            .header(header::USER_AGENT, "federated-auth")
            .send()
            .await
            .map_err(transport_error)?;
        let user: GitHubUser = parse(check_status(response)?).await?;

        let email_verified = match &user.email {
            Some(email) => {
                let response = self
                    .http_client
                    .get("https://api.github.com/user/emails")
                    .bearer_auth(access_token)
                    .header(header::ACCEPT, "application/vnd.github+json")
                    .header(header::USER_AGENT, "federated-auth")
                    .query(&[("per_page", "100"), ("page", "1")])
                    .send()
                    .await
                    .map_err(transport_error)?;
                let emails: Vec<GitHubEmail> = parse(check_status(response)?).await?;
                emails
                    .iter()
                    .find(|entry| &entry.email == email)
                    .is_some_and(|entry| entry.verified)
            }
            None => false,
        };

        Ok(ProviderProfile {
            provider: OAuthProvider::GitHub,
            provider_user_id: user.id.to_string(),
            email: user.email,
            email_verified,
            first_name: user.name,
            last_name: None,
            avatar_url: user.avatar_url,
        })
    }

    async fn yandex_profile(
        &self,
        client: &OAuthClientConfig,
        access_token: &str,
    ) -> Result<ProviderProfile> {
        let response = self
            .http_client
            .get(&client.user_data_url)
            .header(header::AUTHORIZATION, format!("OAuth {access_token}"))
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;
        let user: YandexUser = parse(check_status(response)?).await?;

        Ok(ProviderProfile {
            provider: OAuthProvider::Yandex,
            provider_user_id: user.id,
            email_verified: user.default_email.is_some(),
            email: user.default_email,
            first_name: user.first_name,
            last_name: user.last_name,
            avatar_url: user
                .default_avatar_id
                .map(|id| format!("https://avatars.yandex.net/get-yapic/{id}/islands-200")),
        })
    }
}

impl IdentityProvider for HttpIdentityProvider {
    async fn fetch_profile(
        &self,
        provider: OAuthProvider,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderProfile> {
        let client = self.client(provider)?;
        let token = self.exchange_code(provider, client, code, code_verifier).await?;

        let profile = match provider {
            OAuthProvider::Google => {
                let id_token = token.id_token.ok_or(AuthError::OAuthProviderUnavailable)?;
                google_profile(&id_token)?
            }
            OAuthProvider::GitHub => {
                let access_token = token.access_token.ok_or(AuthError::OAuthProviderUnavailable)?;
                self.github_profile(client, &access_token).await?
            }
            OAuthProvider::Yandex => {
                let access_token = token.access_token.ok_or(AuthError::OAuthProviderUnavailable)?;
                self.yandex_profile(client, &access_token).await?
            }
        };

        tracing::debug!(
            provider = %provider,
            provider_user_id = %profile.provider_user_id,
            email_verified = profile.email_verified,
            "Fetched OAuth profile"
        );
        Ok(profile)
    }
}

/// Map a provider's HTTP status onto the error taxonomy.
fn status_error(status: StatusCode) -> AuthError {
    if status.is_client_error() {
        AuthError::OAuthProviderRejected {
            status: status.as_u16(),
        }
    } else {
        AuthError::OAuthProviderUnavailable
    }
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        tracing::warn!(status = %status, url = %response.url(), "OAuth provider request failed");
        Err(status_error(status))
    }
}

fn transport_error(e: reqwest::Error) -> AuthError {
    tracing::warn!(error = %e, "OAuth provider unreachable");
    AuthError::OAuthProviderUnavailable
}

async fn parse<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    response.json().await.map_err(|e| {
        tracing::warn!(error = %e, "OAuth provider returned an unexpected payload");
        AuthError::OAuthProviderUnavailable
    })
}

/// Read the claims of an ID token received directly from Google's token endpoint.
///
/// The token arrives over the TLS channel of the code exchange, so its
/// signature is not re-checked here.
fn google_profile(id_token: &str) -> Result<ProviderProfile> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or(AuthError::OAuthProviderUnavailable)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| AuthError::OAuthProviderUnavailable)?;
    let claims: GoogleIdClaims =
        serde_json::from_slice(&bytes).map_err(|_| AuthError::OAuthProviderUnavailable)?;

    Ok(ProviderProfile {
        provider: OAuthProvider::Google,
        provider_user_id: claims.sub,
        email_verified: claims.email.is_some() && claims.email_verified.unwrap_or(false),
        email: claims.email,
        first_name: claims.given_name,
        last_name: claims.family_name,
        avatar_url: claims.picture,
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Wire Types
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    id_token: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleIdClaims {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: u64,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    verified: bool,
}

#[derive(Debug, Deserialize)]
struct YandexUser {
    id: String,
    default_email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    default_avatar_id: Option<String>,
}
