use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue};
use axum_test::{multipart::Part, TestServer};
use tempfile::TempDir;

use crate::{
    app::build_app,
    auth::{jwt::JwtKeys, password::hash_password},
    config::{AppConfig, JwtConfig, UploadConfig},
    state::AppState,
    storage::DiskStorage,
    users::{memory::MemoryUserRepo, NewUser, Role, User, UserRepo},
};

pub const TEST_MAX_FILE_SIZE: u64 = 1024;

pub struct TestApp {
    pub state: AppState,
    pub upload_dir: TempDir,
}

pub fn test_config(upload_dir: &std::path::Path) -> AppConfig {
    AppConfig {
        database_url: "memory://".into(),
        jwt: JwtConfig {
            secret: "test-secret-test-secret-test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            ttl_minutes: 60,
        },
        upload: UploadConfig {
            dir: upload_dir.to_path_buf(),
            max_file_size: TEST_MAX_FILE_SIZE,
            allowed_types: UploadConfig::default_allowed_types(),
        },
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_repo(Arc::new(MemoryUserRepo::new())).await
    }

    pub async fn with_repo(users: Arc<dyn UserRepo>) -> Self {
        let upload_dir = tempfile::tempdir().expect("tempdir");
        let config = Arc::new(test_config(upload_dir.path()));
        let storage = Arc::new(DiskStorage::init(upload_dir.path()).await.expect("storage"));
        Self {
            state: AppState::from_parts(users, config, storage),
            upload_dir,
        }
    }

    pub fn server(&self) -> TestServer {
        TestServer::new(build_app(self.state.clone())).expect("test server")
    }

    /// Inserts a user whose hash is not a real password hash; use
    /// [`TestApp::seed_user_with_password`] when the test logs in.
    pub async fn seed_user(&self, username: &str, role: Role) -> User {
        self.insert(username, "not-a-real-hash".into(), role).await
    }

    pub async fn seed_user_with_password(&self, username: &str, password: &str, role: Role) -> User {
        let hash = hash_password(password).expect("hash");
        self.insert(username, hash, role).await
    }

    async fn insert(&self, username: &str, password_hash: String, role: Role) -> User {
        self.state
            .users
            .create(NewUser {
                username: username.into(),
                email: format!("{username}@example.com"),
                password_hash,
                first_name: "Test".into(),
                last_name: username.into(),
                role,
            })
            .await
            .expect("seed user")
    }

    pub fn token_for(&self, user: &User) -> String {
        JwtKeys::from(&self.state.config.jwt)
            .sign(user.id)
            .expect("sign")
    }

    pub fn bearer_for(&self, user: &User) -> (HeaderName, HeaderValue) {
        bearer(&self.token_for(user))
    }
}

pub fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
    )
}

/// A file part for [`MultipartForm`](axum_test::multipart::MultipartForm).
pub fn file_part(filename: &str, mime_type: &str, data: &[u8]) -> Part {
    Part::bytes(data.to_vec())
        .file_name(filename)
        .mime_type(mime_type)
}

/// Every regular file under `dir`, non-recursive.
pub fn files_in(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
