/// Mock OpenID Connect provider for the login flow tests.
///
/// Serves discovery, JWKS, an authorization endpoint that immediately
/// redirects back with a code, a token endpoint issuing RS256 ID tokens,
/// and Auth0's `/v2/logout`. Like Auth0, the discovery document reports the
/// issuer with a trailing slash.
use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub const CLIENT_ID: &str = "test-client";

/// Signing keys the provider can rotate through: (kid, private key PEM, JWK modulus).
/// Both use the exponent 65537.
const SIGNING_KEYS: &[(&str, &[u8], &str)] = &[
    (
        "mock-idp-key-1",
        include_bytes!("../fixtures/idp_rsa_key.pem"),
        "w56xsk7iH2zs7OqLIJ16rPUABBDL_8eTlWH4nemvooGANB0drwfQqr7MDFRKfz2VNxScMQXy35UL25kPIpEJlcE9HjH6Jqsim3sz5Pk-KP0quz58nZmLSM3sSRak_XE6xBqVxXCVM09P8og_w0IQ6eVnjIaegEOwFhmC8lAwPXuIlsQXS6Rxt9GH_RyVokS-KL5FWVoHjjFZPyij2ytXeXnCArPiyx8kJArQ4JnPZoTXCF4psStZ9qlQd82h-yMn7_exbliAKLMoOrYzw5fUg102YFhAxF7LcJAcg6EhRbGI1TTtJXskN7t_7fi-UCzPzeIgtPNAS2z0X_zmxXSonw",
    ),
    (
        "mock-idp-key-2",
        include_bytes!("../fixtures/idp_rsa_key_2.pem"),
        "rxMAAoArt0yxL35e0WISPe963DH4KbXxJBDcEGK_WIv0zzUc36XI-HL1DMU0jOttiTFWy0cM_7qEMExWOBjgv2pte61THoUYlRgNgHQAMY5ZcHYVkEIMDNa0Y0wDoPaeZAptFxLeNVh7XSL_VLePVmFpT4VfPa5EM0SBy3jrZx0uAdfDpYQ7pxQv69I8eWlfJncP3vHfZMX2ZPw3Oqc9meIsIwHAUiHgHh6vvvvS2mrqhpIdP4tQ4J3JIV_a-NkfP_XxlwBEf8wxHlYd2CQAy6kWwfx-wZm0aqo7M6xe50sw6CnpVO9scg0M3XQtXArgnM8QerSf_OriaSEzy_PnGw",
    ),
];
const EXPONENT: &str = "AQAB";

#[derive(Clone)]
struct IdpState {
    /// Origin the endpoints live under
    base: String,
    /// `iss` as reported in discovery and ID tokens
    issuer: String,
    /// Index into SIGNING_KEYS; only this key is published and used
    active_key: Arc<AtomicUsize>,
    user: Arc<Value>,
    /// Issued authorization codes and the nonce each was issued for
    codes: Arc<Mutex<HashMap<String, String>>>,
    next_code: Arc<AtomicU64>,
}

pub struct MockIdp {
    pub port: u16,
    base: String,
    active_key: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockIdp {
    /// Start a provider on a random port that signs in `user`
    pub async fn start(user: Value) -> anyhow::Result<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        let base = format!("http://127.0.0.1:{}", port);
        let active_key = Arc::new(AtomicUsize::new(0));

        let state = IdpState {
            base: base.clone(),
            issuer: format!("{}/", base),
            active_key: Arc::clone(&active_key),
            user: Arc::new(user),
            codes: Arc::new(Mutex::new(HashMap::new())),
            next_code: Arc::new(AtomicU64::new(1)),
        };

        let app = Router::new()
            .route("/.well-known/openid-configuration", get(handle_discovery))
            .route("/jwks", get(handle_jwks))
            .route("/authorize", get(handle_authorize))
            .route("/oauth/token", post(handle_token))
            .route("/v2/logout", get(handle_logout))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Mock IdP failed to start");
        });

        Ok(Self {
            port,
            base,
            active_key,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Issuer as an app would configure it: the origin, no trailing slash
    pub fn issuer(&self) -> &str {
        &self.base
    }

    /// Switch to the next signing key and stop publishing the old one
    pub fn rotate_key(&self) {
        self.active_key.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockIdp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle_discovery(State(state): State<IdpState>) -> Json<Value> {
    let base = &state.base;
    Json(json!({
        "issuer": state.issuer,
        "authorization_endpoint": format!("{}/authorize", base),
        "token_endpoint": format!("{}/oauth/token", base),
        "jwks_uri": format!("{}/jwks", base),
        "response_types_supported": ["code"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "scopes_supported": ["openid", "profile", "email"],
    }))
}

fn signing_key(state: &IdpState) -> (&'static str, &'static [u8], &'static str) {
    SIGNING_KEYS[state.active_key.load(Ordering::SeqCst) % SIGNING_KEYS.len()]
}

async fn handle_jwks(State(state): State<IdpState>) -> Json<Value> {
    let (kid, _, modulus) = signing_key(&state);
    Json(json!({
        "keys": [{
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": kid,
            "n": modulus,
            "e": EXPONENT,
        }]
    }))
}

/// Signs the user in without a login form and redirects back with a code
async fn handle_authorize(
    State(state): State<IdpState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let param = |name: &str| params.get(name).cloned().unwrap_or_default();

    if param("client_id") != CLIENT_ID || param("response_type") != "code" {
        return (StatusCode::BAD_REQUEST, "unsupported authorization request").into_response();
    }

    let code = format!("code-{}", state.next_code.fetch_add(1, Ordering::SeqCst));
    state
        .codes
        .lock()
        .unwrap()
        .insert(code.clone(), param("nonce"));

    let mut redirect = match url::Url::parse(&param("redirect_uri")) {
        Ok(url) => url,
        Err(_) => return (StatusCode::BAD_REQUEST, "bad redirect_uri").into_response(),
    };
    redirect
        .query_pairs_mut()
        .append_pair("code", &code)
        .append_pair("state", &param("state"));

    (StatusCode::FOUND, [(header::LOCATION, redirect.to_string())]).into_response()
}

async fn handle_token(
    State(state): State<IdpState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let client_authenticated = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Basic "))
        || form.get("client_secret").is_some();

    if !client_authenticated {
        return token_error(StatusCode::UNAUTHORIZED, "invalid_client");
    }

    if form.get("grant_type").map(String::as_str) != Some("authorization_code") {
        return token_error(StatusCode::BAD_REQUEST, "unsupported_grant_type");
    }

    // Codes are single use
    let nonce = form
        .get("code")
        .and_then(|code| state.codes.lock().unwrap().remove(code));
    let Some(nonce) = nonce else {
        return token_error(StatusCode::BAD_REQUEST, "invalid_grant");
    };

    let now = chrono::Utc::now().timestamp();
    let mut claims = json!({
        "iss": state.issuer,
        "aud": CLIENT_ID,
        "iat": now,
        "exp": now + 3600,
        "nonce": nonce,
    });
    if let (Some(claims), Some(user)) = (claims.as_object_mut(), state.user.as_object()) {
        for (key, value) in user {
            claims.insert(key.clone(), value.clone());
        }
    }

    let (kid, pem, _) = signing_key(&state);
    let mut jwt_header = Header::new(Algorithm::RS256);
    jwt_header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(pem).expect("fixture key is valid PEM");
    let id_token = jsonwebtoken::encode(&jwt_header, &claims, &key).expect("signing failed");

    Json(json!({
        "access_token": "mock-access-token",
        "token_type": "Bearer",
        "expires_in": 3600,
        "id_token": id_token,
    }))
    .into_response()
}

async fn handle_logout(Query(params): Query<HashMap<String, String>>) -> Response {
    match params.get("returnTo") {
        Some(target) => (StatusCode::FOUND, [(header::LOCATION, target.clone())]).into_response(),
        None => (StatusCode::OK, "logged out").into_response(),
    }
}

fn token_error(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}
