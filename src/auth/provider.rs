/// Identity provider seam
///
/// The `IdentityProvider` trait is what the identity middleware talks to.
/// `OidcProvider` implements it against any OpenID Connect issuer using
/// discovery, the authorization code grant and ID token verification.
use async_trait::async_trait;
use openidconnect::{
    AuthenticationFlow, AuthorizationCode, ClaimsVerificationError, ClientId, ClientSecret,
    CsrfToken, DiscoveryError, HttpClientError, IssuerUrl, Nonce, OAuth2TokenResponse,
    RedirectUrl, RequestTokenError, Scope, TokenResponse,
    core::{CoreClient, CoreIdToken, CoreIdTokenClaims, CoreProviderMetadata, CoreResponseType},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

use super::config::AuthConfig;
use super::error::AuthError;

/// ID token claims that describe the token itself rather than the user
const PROTOCOL_CLAIMS: &[&str] = &[
    "iss", "aud", "exp", "iat", "nbf", "nonce", "azp", "auth_time", "at_hash", "c_hash", "s_hash",
    "acr", "amr", "sid", "jti",
];

/// User claims from the ID token, minus protocol claims.
///
/// Fields are provider-defined; the common ones are typed and everything
/// else is kept in `extra` so templates can still reach it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserClaims {
    #[serde(default)]
    pub sub: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserClaims {
    /// Build from a JSON view of verified ID token claims
    pub fn from_id_token_claims(claims: Value) -> Result<Self, AuthError> {
        let Value::Object(mut map) = claims else {
            return Err(AuthError::TokenVerificationFailed(
                "ID token claims are not a JSON object".to_string(),
            ));
        };

        for claim in PROTOCOL_CLAIMS {
            map.remove(*claim);
        }

        Ok(serde_json::from_value(Value::Object(map))?)
    }

    pub fn is_empty(&self) -> bool {
        self == &UserClaims::default()
    }
}

/// Tokens and claims obtained from a successful code exchange
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub id_token: String,
    pub access_token: Option<String>,
    pub claims: UserClaims,
}

/// What the identity middleware needs from an identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authorization endpoint URL for a login carrying `state` and `nonce`
    async fn authorization_url(&self, state: &str, nonce: &str) -> Result<Url, AuthError>;

    /// Exchange an authorization code and verify the returned ID token
    /// against `nonce`
    async fn exchange_code(&self, code: &str, nonce: &str) -> Result<TokenSet, AuthError>;

    /// Where to send the browser to end the IdP session, if anywhere
    fn logout_url(&self, return_to: &str) -> Result<Option<Url>, AuthError>;
}

/// Type alias for the OIDC client with endpoints set from provider metadata
type ConfiguredCoreClient = openidconnect::Client<
    openidconnect::EmptyAdditionalClaims,
    openidconnect::core::CoreAuthDisplay,
    openidconnect::core::CoreGenderClaim,
    openidconnect::core::CoreJweContentEncryptionAlgorithm,
    openidconnect::core::CoreJsonWebKey,
    openidconnect::core::CoreAuthPrompt,
    openidconnect::StandardErrorResponse<openidconnect::core::CoreErrorResponseType>,
    openidconnect::core::CoreTokenResponse,
    openidconnect::core::CoreTokenIntrospectionResponse,
    openidconnect::core::CoreRevocableToken,
    openidconnect::core::CoreRevocationErrorResponse,
    openidconnect::EndpointSet,
    openidconnect::EndpointNotSet,
    openidconnect::EndpointNotSet,
    openidconnect::EndpointNotSet,
    openidconnect::EndpointMaybeSet,
    openidconnect::EndpointMaybeSet,
>;

/// OpenID Connect provider backed by discovery
pub struct OidcProvider {
    issuer_url: IssuerUrl,
    client_id: ClientId,
    client_secret: ClientSecret,
    redirect_uri: RedirectUrl,
    scopes: Vec<String>,
    auth0_logout: bool,
    http_client: reqwest::Client,
    /// Discovered on first use so startup does not depend on the IdP.
    /// Replaced when the provider's signing keys change.
    metadata: RwLock<Option<Arc<CoreProviderMetadata>>>,
}

type HttpDiscoveryError = DiscoveryError<HttpClientError<reqwest::Error>>;

impl OidcProvider {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let issuer_url =
            IssuerUrl::new(config.issuer_base_url.clone()).map_err(|e| AuthError::InvalidConfig {
                key: "issuer_base_url".to_string(),
                reason: e.to_string(),
            })?;

        let redirect_uri =
            RedirectUrl::new(config.redirect_uri()).map_err(|e| AuthError::InvalidConfig {
                key: "base_url".to_string(),
                reason: e.to_string(),
            })?;

        // Redirects stay disabled so a discovery document cannot bounce us elsewhere
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            issuer_url,
            client_id: ClientId::new(config.client_id.clone()),
            client_secret: ClientSecret::new(config.client_secret.clone()),
            redirect_uri,
            scopes: config
                .authorization_params
                .scopes()
                .map(str::to_string)
                .collect(),
            auth0_logout: config.auth0_logout,
            http_client,
            metadata: RwLock::new(None),
        })
    }

    async fn metadata(&self) -> Result<Arc<CoreProviderMetadata>, AuthError> {
        if let Some(metadata) = self.metadata.read().await.as_ref() {
            return Ok(Arc::clone(metadata));
        }
        self.rediscover().await
    }

    /// Fetch the discovery document and JWKS again, replacing the cached copy
    async fn rediscover(&self) -> Result<Arc<CoreProviderMetadata>, AuthError> {
        let metadata = Arc::new(self.discover().await.map_err(|e| {
            tracing::error!("OIDC discovery failed: {e:?}");
            match e {
                DiscoveryError::Request(HttpClientError::Reqwest(e)) if e.is_timeout() => {
                    AuthError::Timeout
                }
                other => AuthError::DiscoveryFailed(other.to_string()),
            }
        })?);

        *self.metadata.write().await = Some(Arc::clone(&metadata));
        Ok(metadata)
    }

    async fn discover(&self) -> Result<CoreProviderMetadata, HttpDiscoveryError> {
        tracing::debug!("Discovering OIDC provider at {}", self.issuer_url.as_str());
        match self.discover_at(self.issuer_url.clone()).await {
            // Issuers must match exactly, and providers disagree on the
            // trailing slash (Auth0 reports one)
            Err(DiscoveryError::Validation(reason)) => match toggle_trailing_slash(&self.issuer_url)
            {
                Some(alternate) => {
                    tracing::debug!(
                        "Issuer mismatch ({}), retrying discovery as {}",
                        reason,
                        alternate.as_str()
                    );
                    self.discover_at(alternate).await
                }
                None => Err(DiscoveryError::Validation(reason)),
            },
            result => result,
        }
    }

    async fn discover_at(
        &self,
        issuer: IssuerUrl,
    ) -> Result<CoreProviderMetadata, HttpDiscoveryError> {
        CoreProviderMetadata::discover_async(issuer, &self.http_client).await
    }

    fn client(&self, metadata: &CoreProviderMetadata) -> ConfiguredCoreClient {
        CoreClient::from_provider_metadata(
            metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_uri.clone())
    }

    fn verify(
        &self,
        metadata: &CoreProviderMetadata,
        id_token: &CoreIdToken,
        nonce: &Nonce,
    ) -> Result<CoreIdTokenClaims, ClaimsVerificationError> {
        let client = self.client(metadata);
        let verifier = client.id_token_verifier();
        id_token.claims(&verifier, nonce).cloned()
    }
}

/// The same issuer with the trailing slash added or removed
fn toggle_trailing_slash(issuer: &IssuerUrl) -> Option<IssuerUrl> {
    let current = issuer.as_str();
    let alternate = match current.strip_suffix('/') {
        Some(trimmed) => trimmed.to_string(),
        None => format!("{}/", current),
    };
    IssuerUrl::new(alternate).ok()
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    async fn authorization_url(&self, state: &str, nonce: &str) -> Result<Url, AuthError> {
        let metadata = self.metadata().await?;
        let client = self.client(&metadata);

        let state = state.to_string();
        let nonce = nonce.to_string();
        let mut request = client.authorize_url(
            AuthenticationFlow::<CoreResponseType>::AuthorizationCode,
            move || CsrfToken::new(state),
            move || Nonce::new(nonce),
        );

        // openid is always sent by the client itself
        for scope in self.scopes.iter().filter(|s| *s != "openid") {
            request = request.add_scope(Scope::new(scope.clone()));
        }

        let (url, _state, _nonce) = request.url();
        Ok(url)
    }

    async fn exchange_code(&self, code: &str, nonce: &str) -> Result<TokenSet, AuthError> {
        let metadata = self.metadata().await?;
        let client = self.client(&metadata);

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| AuthError::CodeExchangeFailed(e.to_string()))?
            .request_async(&self.http_client)
            .await
            .map_err(|e| {
                tracing::warn!("token exchange failed: {e:?}");
                match e {
                    RequestTokenError::Request(HttpClientError::Reqwest(e)) if e.is_timeout() => {
                        AuthError::Timeout
                    }
                    other => AuthError::CodeExchangeFailed(other.to_string()),
                }
            })?;

        let id_token = token_response.id_token().ok_or_else(|| {
            AuthError::TokenVerificationFailed("token response has no id_token".to_string())
        })?;

        let nonce = Nonce::new(nonce.to_string());
        let claims = match self.verify(&metadata, id_token, &nonce) {
            // Unknown or rotated signing key: refresh the JWKS once and retry
            Err(ClaimsVerificationError::SignatureVerification(e)) => {
                tracing::info!("ID token signature not verified ({}), refreshing provider keys", e);
                let metadata = self.rediscover().await?;
                self.verify(&metadata, id_token, &nonce)
            }
            result => result,
        }
        .map_err(|e| AuthError::TokenVerificationFailed(e.to_string()))?;

        let raw_id_token = serde_json::to_value(id_token)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AuthError::JsonError("ID token did not serialize to a string".into()))?;

        Ok(TokenSet {
            id_token: raw_id_token,
            access_token: Some(token_response.access_token().secret().to_string()),
            claims: UserClaims::from_id_token_claims(serde_json::to_value(&claims)?)?,
        })
    }

    fn logout_url(&self, return_to: &str) -> Result<Option<Url>, AuthError> {
        if !self.auth0_logout {
            return Ok(None);
        }

        let issuer = self.issuer_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{}/v2/logout", issuer)).map_err(|e| {
            AuthError::InvalidConfig {
                key: "issuer_base_url".to_string(),
                reason: e.to_string(),
            }
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", self.client_id.as_str())
            .append_pair("returnTo", return_to);

        Ok(Some(url))
    }
}
