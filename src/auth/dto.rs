use jsonwebtoken::{DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::{Date, OffsetDateTime};

/// JWT payload carried by session credentials.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64,      // user ID
    pub email: String, // user email
    pub exp: usize,    // expiration time
    pub iat: usize,    // issued at
    pub iss: String,   // issuer
    pub aud: String,   // audience
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

/// Request body for user registration. Fields are optional so that missing
/// input surfaces as the stable validation error rather than a serde reject.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Request body for requesting a password-reset link.
#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

/// Request body for redeeming a password-reset token.
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: Option<String>,
    #[serde(rename = "newPassword")]
    pub new_password: Option<String>,
}

/// Request body for changing the password of a logged-in user.
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(rename = "currentPassword")]
    pub current_password: Option<String>,
    #[serde(rename = "newPassword")]
    pub new_password: Option<String>,
}

/// Partial profile update; absent (or empty) fields are left untouched.
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub birthday: Option<String>,
    pub bio: Option<String>,
}

/// Response returned after register or login.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub token: String,
}

/// Generic success envelope for operations without a payload.
#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub status: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub status: &'static str,
    pub user: ProfileData,
}

/// Profile fields plus derived stats, as returned by the profile endpoint.
#[derive(Debug, Serialize)]
pub struct ProfileData {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub birthday: Option<Date>,
    pub bio: Option<String>,
    pub last_login: Option<OffsetDateTime>,
    pub profile_completion: i32,
    #[serde(rename = "upcomingEvents")]
    pub upcoming_events: i64,
}

#[derive(Debug, Serialize)]
pub struct ProfileUpdateResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub profile_completion: i32,
}
