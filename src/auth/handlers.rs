use axum::{
    extract::{FromRef, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use time::{macros::format_description, Date, Duration as TimeDuration, OffsetDateTime};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, ProfileData,
            ProfileResponse, ProfileUpdateResponse, RegisterRequest, ResetPasswordRequest,
            StatusMessage, TokenResponse, UpdateProfileRequest,
        },
        repo::User,
        services::{
            generate_reset_token, hash_password, is_valid_email, profile_completion,
            verify_password, AuthUser, JwtKeys,
        },
    },
    error::{is_unique_violation, ApiError},
    mailer::{password_reset_email, send_in_background, welcome_email},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/verify", get(verify))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/profile", get(get_profile).put(update_profile))
        .route("/auth/change-password", post(change_password))
        .route("/auth/account", delete(delete_account))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    let name = payload.name.unwrap_or_default();
    let email = payload.email.unwrap_or_default();
    let password = payload.password.unwrap_or_default();

    if name.is_empty() || email.is_empty() || password.is_empty() {
        warn!("registration with missing fields");
        return Err(ApiError::validation("All fields are required"));
    }
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::validation("Invalid email"));
    }
    if password.len() < 8 {
        warn!("password too short");
        return Err(ApiError::validation(
            "Password must be at least 8 characters long",
        ));
    }

    if User::find_by_email(&state.db, &email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(ApiError::conflict("User already exists"));
    }

    let hash = hash_password(&password)?;
    let user = match User::create(&state.db, &name, &email, &hash).await {
        Ok(user) => user,
        // Two racing registrations can both pass the existence check
        Err(e) if is_unique_violation(&e) => {
            warn!(email = %email, "email already registered");
            return Err(ApiError::conflict("User already exists"));
        }
        Err(e) => return Err(e.into()),
    };

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, &user.email)?;
    User::store_session_token(&state.db, user.id, &token).await?;

    let (subject, html) = welcome_email(&user.name);
    send_in_background(state.mailer.clone(), user.email.clone(), subject, html);

    info!(user_id = user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            status: "success",
            message: "User registered successfully!",
            token,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let email = payload.email.unwrap_or_default();
    let password = payload.password.unwrap_or_default();

    if email.is_empty() || password.is_empty() {
        return Err(ApiError::validation("Email and password are required"));
    }

    // Same error for unknown email and wrong password
    let user = match User::find_by_email(&state.db, &email).await? {
        Some(user) => user,
        None => {
            warn!(email = %email, "login unknown email");
            return Err(ApiError::auth("Invalid email or password"));
        }
    };
    if !verify_password(&password, &user.password_hash)? {
        warn!(user_id = user.id, "login invalid password");
        return Err(ApiError::auth("Invalid email or password"));
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, &user.email)?;
    User::record_login(&state.db, user.id, &token).await?;

    info!(user_id = user.id, email = %user.email, "user logged in");
    Ok(Json(TokenResponse {
        status: "success",
        message: "Login successful",
        token,
    }))
}

#[instrument(skip(state, headers))]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatusMessage>, ApiError> {
    if let Some(token) = bearer_token(&headers) {
        User::clear_session_token(&state.db, &token).await?;
    }
    Ok(Json(StatusMessage {
        status: "success",
        message: "Logout successful",
    }))
}

/// The heavier session check: the token must still be stored for some user
/// AND carry a valid signature. A stored token that fails the signature
/// check is forgotten on the spot.
#[instrument(skip(state, headers))]
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatusMessage>, ApiError> {
    let token = bearer_token(&headers).ok_or_else(|| ApiError::auth("No token provided"))?;

    if User::find_by_session_token(&state.db, &token)
        .await?
        .is_none()
    {
        return Err(ApiError::auth("Invalid or expired token"));
    }

    let keys = JwtKeys::from_ref(&state);
    if keys.verify(&token).is_err() {
        warn!("stored session token failed verification; clearing");
        User::clear_session_token(&state.db, &token).await?;
        return Err(ApiError::auth("Invalid or expired token"));
    }

    Ok(Json(StatusMessage {
        status: "success",
        message: "Token is valid",
    }))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<StatusMessage>, ApiError> {
    let email = payload.email.unwrap_or_default();
    if email.is_empty() {
        return Err(ApiError::validation("Email is required"));
    }

    let user = User::find_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let token = generate_reset_token();
    let expiry = OffsetDateTime::now_utc() + TimeDuration::minutes(15);
    User::set_reset_token(&state.db, &email, &token, expiry).await?;

    let link = format!(
        "{}/reset-password.html?token={}",
        state.config.mail.frontend_url, token
    );
    let (subject, html) = password_reset_email(&link);
    send_in_background(state.mailer.clone(), user.email.clone(), subject, html);

    info!(user_id = user.id, "password reset requested");
    Ok(Json(StatusMessage {
        status: "success",
        message: "Password reset email sent. Check your inbox!",
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<StatusMessage>, ApiError> {
    let token = payload.token.unwrap_or_default();
    let new_password = payload.new_password.unwrap_or_default();

    if token.is_empty() || new_password.is_empty() {
        return Err(ApiError::validation("Token and new password are required"));
    }
    if new_password.len() < 8 {
        return Err(ApiError::validation(
            "Password must be at least 8 characters long",
        ));
    }

    let user = User::find_by_valid_reset_token(&state.db, &token)
        .await?
        .ok_or_else(|| ApiError::auth("Invalid or expired reset token"))?;

    let hash = hash_password(&new_password)?;
    User::reset_password(&state.db, user.id, &hash).await?;

    info!(user_id = user.id, "password reset completed");
    Ok(Json(StatusMessage {
        status: "success",
        message: "Password reset successful. You can now log in!",
    }))
}

#[instrument(skip(state, user, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<StatusMessage>, ApiError> {
    let current = payload.current_password.unwrap_or_default();
    let new_password = payload.new_password.unwrap_or_default();

    if current.is_empty() || new_password.is_empty() {
        return Err(ApiError::validation(
            "Current password and new password are required",
        ));
    }
    if new_password.len() < 8 {
        return Err(ApiError::validation(
            "New password must be at least 8 characters long",
        ));
    }

    let record = User::find_by_id(&state.db, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if !verify_password(&current, &record.password_hash)? {
        warn!(user_id = user.id, "change password with wrong current password");
        return Err(ApiError::auth("Current password is incorrect"));
    }

    // Deliberately leaves the session token alone; only a reset forces
    // re-login everywhere.
    let hash = hash_password(&new_password)?;
    User::update_password(&state.db, user.id, &hash).await?;

    info!(user_id = user.id, "password changed");
    Ok(Json(StatusMessage {
        status: "success",
        message: "Password changed successfully",
    }))
}

#[instrument(skip(state, user))]
pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let record = User::find_by_id(&state.db, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let upcoming_events = User::upcoming_event_count(&state.db, user.id).await?;

    Ok(Json(ProfileResponse {
        status: "success",
        user: ProfileData {
            id: record.id,
            name: record.name,
            email: record.email,
            phone: record.phone,
            birthday: record.birthday,
            bio: record.bio,
            last_login: record.last_login,
            profile_completion: record.profile_completion,
            upcoming_events,
        },
    }))
}

#[instrument(skip(state, user, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileUpdateResponse>, ApiError> {
    // Empty strings count as absent, same as missing keys
    let name = payload.name.filter(|s| !s.trim().is_empty());
    let phone = payload.phone.filter(|s| !s.trim().is_empty());
    let bio = payload.bio.filter(|s| !s.trim().is_empty());
    let birthday = match payload.birthday.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(parse_birthday(raw)?),
        _ => None,
    };

    let merged = User::update_profile(
        &state.db,
        user.id,
        name.as_deref(),
        phone.as_deref(),
        birthday,
        bio.as_deref(),
    )
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    let completion = profile_completion(&merged);
    User::set_profile_completion(&state.db, user.id, completion).await?;

    info!(user_id = user.id, completion, "profile updated");
    Ok(Json(ProfileUpdateResponse {
        status: "success",
        message: "Profile updated successfully",
        profile_completion: completion,
    }))
}

#[instrument(skip(state, user))]
pub async fn delete_account(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<StatusMessage>, ApiError> {
    if !User::delete_account(&state.db, user.id).await? {
        return Err(ApiError::not_found("User not found"));
    }

    info!(user_id = user.id, "account deleted");
    Ok(Json(StatusMessage {
        status: "success",
        message: "Account deleted successfully",
    }))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
}

fn parse_birthday(raw: &str) -> Result<Date, ApiError> {
    let fmt = format_description!("[year]-[month]-[day]");
    Date::parse(raw, &fmt).map_err(|_| ApiError::validation("Invalid birthday format"))
}
