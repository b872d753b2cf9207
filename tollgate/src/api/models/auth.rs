use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::users::UserDBResponse;
use crate::types::UserId;
use chrono::{DateTime, Utc};

/// Request to send a one-time login code to an email address
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OtpRequest {
    /// Email address to deliver the code to
    pub email: String,
}

/// Response after an OTP issuance request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OtpRequestResponse {
    /// Status message
    pub message: String,
    /// The issued code, returned inline only when the non-production debug
    /// cache is enabled and email delivery failed. Never set in production.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_code: Option<String>,
}

/// Request to exchange an emailed code for a session
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OtpVerifyRequest {
    /// Email address the code was sent to
    pub email: String,
    /// The 6-digit code from the email
    pub code: String,
}

/// The authenticated user, as re-read from the store on each request.
///
/// This doubles as the extractor target for session-cookie authentication
/// (see [`crate::auth::current_user`]) and the `/api/me` response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<UserDBResponse> for CurrentUser {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            email: db.email,
            created_at: db.created_at,
            last_login: db.last_login,
        }
    }
}

/// Response after successful login
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    /// User information
    pub user: CurrentUser,
    /// Success message
    pub message: String,
}

/// Generic success response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthSuccessResponse {
    pub message: String,
}

/// Response models that implement IntoResponse for cleaner handler code
use axum::{
    Json,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Structured response for successful login
pub struct LoginResponse {
    pub auth_response: AuthResponse,
    pub cookie: String,
}

impl IntoResponse for LoginResponse {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::SET_COOKIE, self.cookie.parse().unwrap());
        (StatusCode::OK, headers, Json(self.auth_response)).into_response()
    }
}

/// Structured response for successful logout
pub struct LogoutResponse {
    pub auth_response: AuthSuccessResponse,
    pub cookie: String,
}

impl IntoResponse for LogoutResponse {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::SET_COOKIE, self.cookie.parse().unwrap());
        (StatusCode::OK, headers, Json(self.auth_response)).into_response()
    }
}
