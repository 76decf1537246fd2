use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    time::{Duration, Instant},
};

use axum::{
    Extension, Json,
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    request_meta::RequestMeta,
    settings::ControlSettings,
    state::AppState,
};

pub const SESSION_COOKIE_NAME: &str = "botPanel.sid";
const ISSUER: &str = "botpanel";
const AUDIENCE: &str = "botpanel-web";
const AUTH_ACTOR: &str = "auth";

fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    use argon2::password_hash::{PasswordHasher, SaltString};
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    let argon2 = argon2::Argon2::default();
    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}

fn verify_password(hash: &str, password: &str) -> bool {
    use argon2::password_hash::{PasswordHash, PasswordVerifier};
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    argon2::Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// The single operator account plus session signing material.
pub struct AuthConfig {
    username: String,
    password_hash: String,
    secret: Vec<u8>,
    ttl: Duration,
    secure_cookie: bool,
}

impl AuthConfig {
    /// Hashes the configured password once so it is never compared in plaintext.
    pub fn from_settings(settings: &ControlSettings) -> anyhow::Result<Self> {
        let password_hash = hash_password(&settings.password)
            .map_err(|e| anyhow::anyhow!("hash operator password: {e}"))?;
        Ok(Self {
            username: settings.username.clone(),
            password_hash,
            secret: settings.session_secret.as_bytes().to_vec(),
            ttl: settings.session_ttl,
            secure_cookie: !settings.development,
        })
    }

    pub fn check_credentials(&self, username: &str, password: &str) -> bool {
        // Verify even on a username mismatch so both paths cost the same.
        let password_ok = verify_password(&self.password_hash, password);
        username == self.username && password_ok
    }

    fn issue(&self, username: &str) -> anyhow::Result<String> {
        let now = time::OffsetDateTime::now_utc();
        let ttl = time::Duration::seconds(i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX));
        let claims = Claims {
            sub: username.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: (now + ttl).unix_timestamp() as usize,
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
        };
        Ok(jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(&self.secret),
        )?)
    }

    pub fn validate(&self, token: &str) -> anyhow::Result<SessionUser> {
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_audience(&[AUDIENCE]);
        validation.set_issuer(&[ISSUER]);

        let data = jsonwebtoken::decode::<Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(&self.secret),
            &validation,
        )?;
        if data.claims.sub != self.username {
            anyhow::bail!("session subject is not the operator");
        }

        Ok(SessionUser {
            username: data.claims.sub,
            login_time: DateTime::<Utc>::from_timestamp(data.claims.iat as i64, 0),
        })
    }

    fn session_cookie(&self, jwt: String) -> Cookie<'static> {
        let mut c = Cookie::new(SESSION_COOKIE_NAME, jwt);
        c.set_http_only(true);
        c.set_same_site(SameSite::Strict);
        c.set_path("/");
        c.set_secure(self.secure_cookie);
        c.set_max_age(time::Duration::seconds(
            i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX),
        ));
        c
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: usize,
    exp: usize,
    iss: String,
    aud: String,
}

/// The authenticated operator, attached to protected requests.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub username: String,
    pub login_time: Option<DateTime<Utc>>,
}

pub fn session_from_jar(auth: &AuthConfig, jar: &CookieJar) -> Option<SessionUser> {
    let cookie = jar.get(SESSION_COOKIE_NAME)?;
    auth.validate(cookie.value()).ok()
}

/// Sliding-window counter of failed logins per client.
pub struct LoginLimiter {
    window: Duration,
    max_failures: usize,
    failures: std::sync::Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl LoginLimiter {
    pub fn new(max_failures: usize, window: Duration) -> Self {
        Self {
            window,
            max_failures,
            failures: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn prune(&self, q: &mut VecDeque<Instant>, now: Instant) {
        while q
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            q.pop_front();
        }
    }

    pub fn is_limited(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let Some(q) = map.get_mut(key) else {
            return false;
        };
        self.prune(q, now);
        q.len() >= self.max_failures
    }

    pub fn record_failure(&self, key: &str) {
        let now = Instant::now();
        let mut map = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let q = map.entry(key.to_string()).or_default();
        self.prune(q, now);
        q.push_back(now);
    }

    pub fn reset(&self, key: &str) {
        let mut map = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(key);
    }
}

fn client_key(addr: Option<ConnectInfo<SocketAddr>>) -> String {
    addr.map(|ConnectInfo(a)| a.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub username: String,
}

pub async fn login(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    addr: Option<ConnectInfo<SocketAddr>>,
    jar: CookieJar,
    Json(input): Json<LoginRequest>,
) -> ApiResult<Response> {
    let key = client_key(addr);
    if state.login_limiter.is_limited(&key) {
        return Err(ApiError::new(
            &meta,
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "Too many login attempts. Please try again later.",
        ));
    }

    let username = input.username.unwrap_or_default();
    let password = input.password.unwrap_or_default();
    if username.is_empty() || password.is_empty() {
        return Err(ApiError::bad_request(
            &meta,
            "Username and password are required",
        ));
    }

    if !state.auth.check_credentials(&username, &password) {
        state.login_limiter.record_failure(&key);
        state.sink.warning(
            AUTH_ACTOR,
            format!("Failed login attempt for username: {username}"),
        );
        return Err(ApiError::unauthorized(&meta, "Invalid username or password"));
    }

    let jwt = state.auth.issue(&username).map_err(|e| {
        state
            .sink
            .error(AUTH_ACTOR, format!("Login error: {e}"));
        ApiError::from_panel(&meta, e.into())
    })?;
    state.login_limiter.reset(&key);
    state
        .sink
        .success(&username, format!("User {username} logged in"));

    let jar = jar.add(state.auth.session_cookie(jwt));
    Ok((
        jar,
        Json(LoginResponse {
            success: true,
            username,
        }),
    )
        .into_response())
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let username = session_from_jar(&state.auth, &jar)
        .map(|u| u.username)
        .unwrap_or_else(|| "unknown".to_string());
    state
        .sink
        .info(&username, format!("User {username} logged out"));

    let mut removal = Cookie::from(SESSION_COOKIE_NAME);
    removal.set_path("/");
    let jar = jar.remove(removal);
    (jar, Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_time: Option<DateTime<Utc>>,
}

pub async fn status(State(state): State<AppState>, jar: CookieJar) -> Json<AuthStatus> {
    let session = session_from_jar(&state.auth, &jar);
    Json(AuthStatus {
        authenticated: session.is_some(),
        username: session.as_ref().map(|s| s.username.clone()),
        login_time: session.and_then(|s| s.login_time),
    })
}
