use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::common::types::{Timestamp, UserId, now_millis};
use crate::error::AuthError;

pub const IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1";

/// Credentials issued on sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: UserId,
    pub email: String,
    pub id_token: String,
    pub refresh_token: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: Timestamp,
}

impl Session {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn create_account(&self, email: &str, password: &str) -> Result<UserId, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    id_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Map an Identity Toolkit error code (e.g. `WEAK_PASSWORD : ...`) to a user-facing error.
pub fn map_error_code(message: &str) -> AuthError {
    let code = message.split([' ', ':']).next().unwrap_or_default();
    match code {
        "EMAIL_EXISTS" => AuthError::EmailInUse,
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => {
            AuthError::InvalidCredentials
        }
        "WEAK_PASSWORD" => AuthError::WeakPassword,
        "USER_DISABLED" => AuthError::UserDisabled,
        "TOO_MANY_ATTEMPTS_TRY_LATER" => AuthError::TooManyAttempts,
        "INVALID_EMAIL" | "MISSING_EMAIL" => {
            AuthError::InvalidInput("The email address is badly formatted.".to_string())
        }
        "MISSING_PASSWORD" => AuthError::InvalidInput("A password is required.".to_string()),
        _ => AuthError::Rejected(message.to_string()),
    }
}

/// Email/password accounts through the Identity Toolkit REST API.
pub struct IdentityToolkitClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl IdentityToolkitClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: IDENTITY_ENDPOINT.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn call(
        &self,
        method: &str,
        email: &str,
        password: &str,
    ) -> Result<AccountResponse, AuthError> {
        let url = format!("{}/accounts:{}", self.endpoint, method);
        let response = self
            .http
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&PasswordRequest {
                email,
                password,
                return_secure_token: true,
            })
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response.json().await?);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let err = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => map_error_code(&envelope.error.message),
            Err(_) => AuthError::Rejected(format!("{status}")),
        };
        log::warn!("accounts:{method} for {email} failed: {err}");
        Err(err)
    }
}

#[async_trait]
impl AuthProvider for IdentityToolkitClient {
    async fn create_account(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        let account = self.call("signUp", email, password).await?;
        log::info!("Created account {}", account.local_id);
        Ok(UserId::new(account.local_id))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let account = self.call("signInWithPassword", email, password).await?;
        let lifetime = account
            .expires_in
            .as_deref()
            .and_then(|secs| secs.parse::<i64>().ok())
            .unwrap_or(3600);

        Ok(Session {
            user_id: UserId::new(account.local_id),
            email: account.email.unwrap_or_else(|| email.to_string()),
            id_token: account.id_token,
            refresh_token: account.refresh_token,
            expires_at: now_millis() + Duration::seconds(lifetime),
        })
    }
}
