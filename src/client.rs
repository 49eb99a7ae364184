//! Typed HTTP client for the API.
//!
//! Holds the bearer token in a shared [`TokenStore`] and attaches it to every
//! request. Error envelopes surface as [`ClientError::Api`].

use std::sync::{Arc, RwLock};
use std::time::Duration;

use jsonwebtoken::{decode, DecodingKey, Validation};
use reqwest::{multipart, Client, Method, RequestBuilder, Response};
use serde::{
    de::{DeserializeOwned, IgnoredAny},
    Deserialize,
};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::dto::{
        AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest, UpdateProfileRequest,
        UserEnvelope,
    },
    storage::FileInfo,
    uploads::handlers::{ProfilePictureUpload, UploadedFile, UploadedFiles},
    users::{
        dto::{ListUsersQuery, StatsEnvelope, UserList},
        Role, User, UserStats,
    },
};

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-2xx status.
    #[error("api error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        body: Value,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Network(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Shared slot for the current bearer token.
#[derive(Debug, Clone, Default)]
pub struct TokenStore(Arc<RwLock<Option<String>>>);

impl TokenStore {
    pub fn get(&self) -> Option<String> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

/// One file for [`ApiClient::upload_files`].
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub mimetype: String,
    pub data: Vec<u8>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    tokens: TokenStore,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        Self::with_tokens(base_url, TokenStore::default())
    }

    pub fn with_tokens(base_url: impl Into<String>, tokens: TokenStore) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match self.tokens.get() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn envelope<T: DeserializeOwned>(resp: Response) -> ClientResult<Envelope<T>> {
        let status = resp.status();
        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| status.to_string());
            debug!(status = status.as_u16(), %message, "api call failed");
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
                body,
            });
        }
        Ok(resp.json::<Envelope<T>>().await?)
    }

    async fn data<T: DeserializeOwned>(builder: RequestBuilder) -> ClientResult<T> {
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        Self::envelope::<T>(resp)
            .await?
            .data
            .ok_or_else(|| ClientError::Api {
                status,
                message: "Response carried no data".into(),
                body: Value::Null,
            })
    }

    async fn message(builder: RequestBuilder) -> ClientResult<String> {
        let resp = builder.send().await?;
        let envelope = Self::envelope::<Value>(resp).await?;
        Ok(envelope.message.unwrap_or_default())
    }

    pub async fn health(&self) -> ClientResult<Value> {
        let resp = self.request(Method::GET, "/health").send().await?;
        let resp = resp.error_for_status()?;
        Ok(resp.json().await?)
    }

    // --- auth ---

    pub async fn register(&self, req: &RegisterRequest) -> ClientResult<AuthResponse> {
        let auth: AuthResponse =
            Self::data(self.request(Method::POST, "/auth/register").json(req)).await?;
        self.tokens.set(auth.token.clone());
        Ok(auth)
    }

    pub async fn login(&self, identifier: &str, password: &str) -> ClientResult<AuthResponse> {
        let req = LoginRequest {
            identifier: identifier.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse =
            Self::data(self.request(Method::POST, "/auth/login").json(&req)).await?;
        self.tokens.set(auth.token.clone());
        Ok(auth)
    }

    /// Drops the local token. The server keeps no session, so nothing is sent.
    pub fn logout(&self) {
        self.tokens.clear();
    }

    /// True when a token is held and its `exp` lies in the future. The
    /// signature is not checked; only the server can do that.
    pub fn is_authenticated(&self) -> bool {
        let Some(token) = self.tokens.get() else {
            return false;
        };
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_aud = false;
        validation.leeway = 0;
        decode::<IgnoredAny>(&token, &DecodingKey::from_secret(&[]), &validation).is_ok()
    }

    pub async fn me(&self) -> ClientResult<User> {
        let env: UserEnvelope = Self::data(self.request(Method::GET, "/auth/me")).await?;
        Ok(env.user)
    }

    pub async fn update_profile(&self, req: &UpdateProfileRequest) -> ClientResult<User> {
        let env: UserEnvelope =
            Self::data(self.request(Method::PUT, "/auth/update-profile").json(req)).await?;
        Ok(env.user)
    }

    pub async fn change_password(&self, current: &str, new: &str) -> ClientResult<String> {
        let req = ChangePasswordRequest {
            current_password: current.to_string(),
            new_password: new.to_string(),
        };
        Self::message(self.request(Method::PUT, "/auth/change-password").json(&req)).await
    }

    // --- users ---

    pub async fn list_users(&self, query: &ListUsersQuery) -> ClientResult<UserList> {
        Self::data(self.request(Method::GET, "/users").query(query)).await
    }

    pub async fn get_user(&self, id: Uuid) -> ClientResult<User> {
        let env: UserEnvelope =
            Self::data(self.request(Method::GET, &format!("/users/{id}"))).await?;
        Ok(env.user)
    }

    pub async fn set_user_status(&self, id: Uuid, is_active: bool) -> ClientResult<User> {
        let builder = self
            .request(Method::PUT, &format!("/users/{id}/status"))
            .query(&[("isActive", is_active.to_string())]);
        let env: UserEnvelope = Self::data(builder).await?;
        Ok(env.user)
    }

    pub async fn set_user_role(&self, id: Uuid, role: Role) -> ClientResult<User> {
        let builder = self
            .request(Method::PUT, &format!("/users/{id}/role"))
            .query(&[("role", role.as_str())]);
        let env: UserEnvelope = Self::data(builder).await?;
        Ok(env.user)
    }

    pub async fn delete_user(&self, id: Uuid) -> ClientResult<String> {
        Self::message(self.request(Method::DELETE, &format!("/users/{id}"))).await
    }

    pub async fn user_stats(&self) -> ClientResult<UserStats> {
        let env: StatsEnvelope =
            Self::data(self.request(Method::GET, "/users/stats/overview")).await?;
        Ok(env.stats)
    }

    // --- uploads ---

    fn file_part(file: FileUpload) -> ClientResult<multipart::Part> {
        Ok(multipart::Part::bytes(file.data)
            .file_name(file.filename)
            .mime_str(&file.mimetype)?)
    }

    pub async fn upload_profile_picture(
        &self,
        file: FileUpload,
    ) -> ClientResult<ProfilePictureUpload> {
        let form = multipart::Form::new().part("profilePicture", Self::file_part(file)?);
        Self::data(
            self.request(Method::POST, "/upload/profile-picture")
                .multipart(form),
        )
        .await
    }

    pub async fn delete_profile_picture(&self) -> ClientResult<String> {
        Self::message(self.request(Method::DELETE, "/upload/profile-picture")).await
    }

    pub async fn upload_files(&self, files: Vec<FileUpload>) -> ClientResult<Vec<UploadedFile>> {
        let mut form = multipart::Form::new();
        for file in files {
            form = form.part("files", Self::file_part(file)?);
        }
        let uploaded: UploadedFiles =
            Self::data(self.request(Method::POST, "/upload/files").multipart(form)).await?;
        Ok(uploaded.files)
    }

    pub async fn delete_file(&self, filename: &str) -> ClientResult<String> {
        Self::message(self.request(Method::DELETE, &format!("/upload/file/{filename}"))).await
    }

    pub async fn file_info(&self, filename: &str) -> ClientResult<FileInfo> {
        Self::data(self.request(Method::GET, &format!("/upload/info/{filename}"))).await
    }
}

/// Typed setters for callers of [`ApiClient::list_users`].
impl ListUsersQuery {
    pub fn page(mut self, page: i64, limit: i64) -> Self {
        self.page = Some(page.to_string());
        self.limit = Some(limit.to_string());
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role.as_str().to_string());
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active.to_string());
        self
    }
}
