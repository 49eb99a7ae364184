use axum::{
    extract::{FromRef, State},
    routing::{get, post, put},
    Router,
};
use tracing::{info, instrument, warn};

use super::{
    dto::{
        AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest, UpdateProfileRequest,
        UserEnvelope,
    },
    extractors::CurrentUser,
    jwt::JwtKeys,
    password::{hash_password, verify_decoy, verify_password},
};
use crate::{
    error::{AppError, AppResult, FieldError},
    response::ApiResponse,
    state::AppState,
    users::{NewUser, ProfileChanges, Role},
    validation::{check_email, check_name, check_password, is_valid_username, normalize_email, AppJson},
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(get_me))
        .route("/auth/update-profile", put(update_profile))
        .route("/auth/change-password", put(change_password))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let username = payload.username.trim().to_string();
    let email = normalize_email(&payload.email);
    let first_name = payload.first_name.trim().to_string();
    let last_name = payload.last_name.trim().to_string();

    let mut errors = Vec::new();
    if !is_valid_username(&username) {
        errors.push(FieldError::new(
            "username",
            "Username must be 3-30 characters of letters, numbers and underscores",
        ));
    }
    check_email(&email, &mut errors);
    check_password("password", &payload.password, &mut errors);
    check_name("firstName", &first_name, &mut errors);
    check_name("lastName", &last_name, &mut errors);
    if !errors.is_empty() {
        return Err(AppError::invalid_fields(errors));
    }

    if state.users.find_by_username(&username).await?.is_some() {
        warn!(%username, "username already taken");
        return Err(AppError::DuplicateIdentity("Username already taken".into()));
    }
    if state.users.find_by_email(&email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(AppError::DuplicateIdentity("Email already registered".into()));
    }

    let password_hash = hash_password(&payload.password)?;
    let user = state
        .users
        .create(NewUser {
            username,
            email,
            password_hash,
            first_name,
            last_name,
            role: Role::User,
        })
        .await?;

    let token = JwtKeys::from_ref(&state).sign(user.id)?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(ApiResponse::created(AuthResponse { token, user })
        .with_message("User registered successfully"))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let identifier = payload.identifier.trim();

    let mut errors = Vec::new();
    if identifier.is_empty() {
        errors.push(FieldError::new("identifier", "Username or email is required"));
    }
    if payload.password.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    }
    if !errors.is_empty() {
        return Err(AppError::invalid_fields(errors));
    }

    let Some(user) = state.users.find_by_identifier(identifier).await? else {
        verify_decoy(&payload.password);
        warn!("login for unknown identifier");
        return Err(AppError::InvalidCredentials);
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(AppError::InvalidCredentials);
    }

    if !user.is_active {
        warn!(user_id = %user.id, "login to deactivated account");
        return Err(AppError::AccountInactive);
    }

    let token = JwtKeys::from_ref(&state).sign(user.id)?;

    info!(user_id = %user.id, "user logged in");
    Ok(ApiResponse::ok(AuthResponse { token, user }).with_message("Login successful"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(CurrentUser(user): CurrentUser) -> AppResult<ApiResponse<UserEnvelope>> {
    Ok(ApiResponse::ok(UserEnvelope { user }))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(payload): AppJson<UpdateProfileRequest>,
) -> AppResult<ApiResponse<UserEnvelope>> {
    let mut errors = Vec::new();
    if payload.role.is_some() {
        errors.push(FieldError::new("role", "Role cannot be changed through this endpoint"));
    }
    if payload.is_active.is_some() {
        errors.push(FieldError::new(
            "isActive",
            "Account status cannot be changed through this endpoint",
        ));
    }

    let changes = ProfileChanges {
        first_name: payload.first_name.map(|s| s.trim().to_string()),
        last_name: payload.last_name.map(|s| s.trim().to_string()),
        email: payload.email.as_deref().map(normalize_email),
    };
    if let Some(first) = &changes.first_name {
        check_name("firstName", first, &mut errors);
    }
    if let Some(last) = &changes.last_name {
        check_name("lastName", last, &mut errors);
    }
    if let Some(email) = &changes.email {
        check_email(email, &mut errors);
    }
    if !errors.is_empty() {
        return Err(AppError::invalid_fields(errors));
    }

    if changes.is_empty() {
        return Ok(ApiResponse::ok(UserEnvelope { user }));
    }

    if let Some(email) = &changes.email {
        if let Some(owner) = state.users.find_by_email(email).await? {
            if owner.id != user.id {
                return Err(AppError::DuplicateIdentity("Email already registered".into()));
            }
        }
    }

    let updated = state
        .users
        .update_profile(user.id, changes)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    info!("profile updated");
    Ok(ApiResponse::ok(UserEnvelope { user: updated }).with_message("Profile updated successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> AppResult<ApiResponse<()>> {
    let mut errors = Vec::new();
    if payload.current_password.is_empty() {
        errors.push(FieldError::new("currentPassword", "Current password is required"));
    }
    check_password("newPassword", &payload.new_password, &mut errors);
    if !errors.is_empty() {
        return Err(AppError::invalid_fields(errors));
    }

    if !verify_password(&payload.current_password, &user.password_hash)? {
        warn!("password change with wrong current password");
        return Err(AppError::InvalidCredentials);
    }

    let hash = hash_password(&payload.new_password)?;
    if !state.users.update_password(user.id, &hash).await? {
        return Err(AppError::NotFound("User not found".into()));
    }

    info!("password changed");
    Ok(ApiResponse::message("Password changed successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bearer, TestApp};
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    fn registration(username: &str, email: &str) -> Value {
        json!({
            "username": username,
            "email": email,
            "password": "SecurePass123",
            "firstName": "John",
            "lastName": "Doe",
        })
    }

    #[tokio::test]
    async fn register_issues_token_for_new_user() {
        let app = TestApp::new().await;
        let server = app.server();

        let res = server
            .post("/api/auth/register")
            .json(&registration("johndoe", "John@Example.com"))
            .await;
        assert_eq!(res.status_code(), StatusCode::CREATED);
        let body: Value = res.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["user"]["email"], "john@example.com");
        assert_eq!(body["data"]["user"]["role"], "user");
        assert!(body["data"]["user"].get("passwordHash").is_none());

        let token = body["data"]["token"].as_str().unwrap();
        let claims = JwtKeys::from(&app.state.config.jwt).verify(token).unwrap();
        let id = body["data"]["user"]["id"].as_str().unwrap();
        assert_eq!(claims.sub.to_string(), id);
        assert!(app.state.users.find_by_id(claims.sub).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_email_in_any_case_is_rejected() {
        let app = TestApp::new().await;
        let server = app.server();
        server
            .post("/api/auth/register")
            .json(&registration("first", "same@example.com"))
            .await;

        let res = server
            .post("/api/auth/register")
            .json(&registration("second", "SAME@example.COM"))
            .await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(res.json::<Value>()["message"], "Email already registered");
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let app = TestApp::new().await;
        let server = app.server();
        server
            .post("/api/auth/register")
            .json(&registration("taken", "one@example.com"))
            .await;

        let res = server
            .post("/api/auth/register")
            .json(&registration("taken", "two@example.com"))
            .await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(res.json::<Value>()["message"], "Username already taken");
    }

    #[tokio::test]
    async fn register_reports_each_invalid_field() {
        let app = TestApp::new().await;
        let res = app
            .server()
            .post("/api/auth/register")
            .json(&json!({ "username": "x", "email": "nope", "password": "123" }))
            .await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = res.json();
        let fields: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["username", "email", "password", "firstName", "lastName"]);
    }

    #[tokio::test]
    async fn malformed_json_uses_error_envelope() {
        let app = TestApp::new().await;
        let res = app
            .server()
            .post("/api/auth/login")
            .content_type("application/json")
            .bytes("{not json".into())
            .await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(res.json::<Value>()["success"], false);
    }

    #[tokio::test]
    async fn login_by_username_or_email() {
        let app = TestApp::new().await;
        app.seed_user_with_password("alice", "SecurePass123", Role::User).await;
        let server = app.server();

        for identifier in ["alice", "ALICE@example.com"] {
            let res = server
                .post("/api/auth/login")
                .json(&json!({ "identifier": identifier, "password": "SecurePass123" }))
                .await;
            assert_eq!(res.status_code(), StatusCode::OK, "identifier {identifier}");
            assert!(res.json::<Value>()["data"]["token"].is_string());
        }
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_identical() {
        let app = TestApp::new().await;
        app.seed_user_with_password("bob", "SecurePass123", Role::User).await;
        let server = app.server();

        let wrong = server
            .post("/api/auth/login")
            .json(&json!({ "identifier": "bob", "password": "WrongPass123" }))
            .await;
        let unknown = server
            .post("/api/auth/login")
            .json(&json!({ "identifier": "nobody", "password": "WrongPass123" }))
            .await;

        assert_eq!(wrong.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(unknown.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.text(), unknown.text());
    }

    #[tokio::test]
    async fn unknown_identifier_pays_hashing_cost() {
        let app = TestApp::new().await;
        app.seed_user_with_password("bob", "SecurePass123", Role::User).await;
        let server = app.server();
        let attempt = |identifier: &'static str| {
            server
                .post("/api/auth/login")
                .json(&json!({ "identifier": identifier, "password": "WrongPass123" }))
        };

        // Warm up both paths before timing.
        attempt("nobody").await;
        attempt("bob").await;

        let started = std::time::Instant::now();
        attempt("bob").await;
        let wrong = started.elapsed();

        let started = std::time::Instant::now();
        attempt("nobody").await;
        let unknown = started.elapsed();

        assert!(
            unknown * 4 >= wrong,
            "unknown {unknown:?} returned far faster than wrong password {wrong:?}"
        );
    }

    #[tokio::test]
    async fn inactive_account_cannot_log_in() {
        let app = TestApp::new().await;
        let user = app.seed_user_with_password("carol", "SecurePass123", Role::User).await;
        app.state.users.set_status(user.id, false).await.unwrap();

        let res = app
            .server()
            .post("/api/auth/login")
            .json(&json!({ "identifier": "carol", "password": "SecurePass123" }))
            .await;
        assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(res.json::<Value>()["message"], "Account is deactivated");
    }

    #[tokio::test]
    async fn me_requires_a_token() {
        let app = TestApp::new().await;
        let server = app.server();
        let res = server.get("/api/auth/me").await;
        assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);

        let (k, v) = bearer("garbage");
        let res = server.get("/api/auth/me").add_header(k, v).await;
        assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_returns_own_record() {
        let app = TestApp::new().await;
        let user = app.seed_user("dave", Role::User).await;
        let (k, v) = app.bearer_for(&user);
        let res = app.server().get("/api/auth/me").add_header(k, v).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.json::<Value>()["data"]["user"]["username"], "dave");
    }

    #[tokio::test]
    async fn update_profile_applies_whitelisted_fields() {
        let app = TestApp::new().await;
        let user = app.seed_user("erin", Role::User).await;
        let (k, v) = app.bearer_for(&user);
        let res = app
            .server()
            .put("/api/auth/update-profile")
            .add_header(k, v)
            .json(&json!({ "firstName": " Erin ", "email": "Erin.New@Example.com" }))
            .await;
        assert_eq!(res.status_code(), StatusCode::OK);
        let body: Value = res.json();
        assert_eq!(body["data"]["user"]["firstName"], "Erin");
        assert_eq!(body["data"]["user"]["email"], "erin.new@example.com");
    }

    #[tokio::test]
    async fn update_profile_rejects_role_and_status() {
        let app = TestApp::new().await;
        let user = app.seed_user("frank", Role::User).await;
        let (k, v) = app.bearer_for(&user);
        let res = app
            .server()
            .put("/api/auth/update-profile")
            .add_header(k, v)
            .json(&json!({ "role": "admin", "isActive": true }))
            .await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);

        let stored = app.state.users.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.role, Role::User);
    }

    #[tokio::test]
    async fn update_profile_rejects_taken_email() {
        let app = TestApp::new().await;
        app.seed_user("grace", Role::User).await;
        let user = app.seed_user("heidi", Role::User).await;
        let (k, v) = app.bearer_for(&user);
        let res = app
            .server()
            .put("/api/auth/update-profile")
            .add_header(k, v)
            .json(&json!({ "email": "GRACE@example.com" }))
            .await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(res.json::<Value>()["message"], "Email already registered");
    }

    #[tokio::test]
    async fn change_password_checks_current_and_keeps_old_tokens() {
        let app = TestApp::new().await;
        let user = app.seed_user_with_password("ivan", "OldPassword1", Role::User).await;
        let (k, v) = app.bearer_for(&user);
        let server = app.server();

        let res = server
            .put("/api/auth/change-password")
            .add_header(k.clone(), v.clone())
            .json(&json!({ "currentPassword": "NotMine123", "newPassword": "NewPassword1" }))
            .await;
        assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);

        let res = server
            .put("/api/auth/change-password")
            .add_header(k.clone(), v.clone())
            .json(&json!({ "currentPassword": "OldPassword1", "newPassword": "NewPassword1" }))
            .await;
        assert_eq!(res.status_code(), StatusCode::OK);

        let res = server
            .post("/api/auth/login")
            .json(&json!({ "identifier": "ivan", "password": "NewPassword1" }))
            .await;
        assert_eq!(res.status_code(), StatusCode::OK);

        // Stateless tokens: the pre-change token still works.
        let res = server.get("/api/auth/me").add_header(k, v).await;
        assert_eq!(res.status_code(), StatusCode::OK);
    }
}
