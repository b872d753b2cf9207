//! OpenAPI documentation for the control-plane API.
//!
//! Covers login, key management, usage, and audit endpoints. The gateway
//! surface (everything forwarded upstream) is deliberately undocumented here:
//! its shape belongs to the upstream service, not to this gateway.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::{api, db::models::audits::AuditEvent};

/// Session-cookie security scheme shared by the account endpoints.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "SessionCookie".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "tollgate_session",
                    "Session cookie issued by `POST /auth/otp/verify`. \
                     The cookie name follows `auth.session.cookie_name`; \
                     `tollgate_session` is the default.",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    paths(
        api::handlers::auth::request_otp,
        api::handlers::auth::verify_otp,
        api::handlers::auth::logout,
        api::handlers::auth::get_current_user,
        api::handlers::api_keys::create_api_key,
        api::handlers::api_keys::list_api_keys,
        api::handlers::api_keys::revoke_api_key,
        api::handlers::usage::get_usage,
        api::handlers::audits::list_audit_entries,
    ),
    components(
        schemas(
            api::models::auth::OtpRequest,
            api::models::auth::OtpRequestResponse,
            api::models::auth::OtpVerifyRequest,
            api::models::auth::CurrentUser,
            api::models::auth::AuthResponse,
            api::models::auth::AuthSuccessResponse,
            api::models::api_keys::ApiKeyCreate,
            api::models::api_keys::ApiKeyResponse,
            api::models::api_keys::ApiKeyInfoResponse,
            api::models::usage::UsageResponse,
            api::models::audits::AuditResponse,
            AuditEvent,
        )
    ),
    tags(
        (name = "auth", description = "Email one-time-code login and session management.

Request a six-digit code with `POST /auth/otp/request`, then exchange it for a
session cookie with `POST /auth/otp/verify`. An account is created on first
successful verification; no separate registration step exists."),
        (name = "api_keys", description = "Create, list, and revoke the API keys the gateway admits.

The key plaintext (`prefix.secret`) appears exactly once, in the creation
response. Gateway requests present it in the `x-api-key` header."),
        (name = "usage", description = "Standing against the per-user daily request quota.

Counts reset at UTC midnight."),
        (name = "audits", description = "Security-relevant events recorded for the account:
logins, key lifecycle changes, and gateway admission decisions."),
    ),
    info(
        title = "Tollgate API",
        version = "0.1.0",
        description = "Control-plane API for the tollgate request-admission gateway.

## Authentication

Account endpoints (`/api/*`) require the session cookie issued at login:

```
cookie: tollgate_session=YOUR_SESSION_TOKEN
```

Gateway requests (every path outside `/auth`, `/api`, `/health`, and `/admin`)
authenticate with an API key in the `x-api-key` header instead.

## Errors

Errors carry a machine-readable `error` code and a human-readable `message`:

```json
{
  \"error\": \"invalid_code\",
  \"message\": \"Invalid or expired login code\"
}
```

Rate-limited responses additionally carry `retry_after_seconds`.",
    ),
)]
pub struct ApiDoc;
