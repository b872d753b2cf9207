//! Common type definitions shared across the crate.
//!
//! This module defines:
//! - Type aliases for entity IDs (UserId, ApiKeyId, etc.)
//! - The in-memory OTP debug cache used by non-production deployments
//!
//! # ID Types
//!
//! All entity IDs are UUIDs wrapped in type aliases for better type safety:
//!
//! - [`UserId`]: User account identifier
//! - [`ApiKeyId`]: API key identifier
//! - [`OtpId`]: One-time passcode identifier
//! - [`AuditId`]: Audit entry identifier

use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type ApiKeyId = Uuid;
pub type OtpId = Uuid;
pub type AuditId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Last-issued OTP code per email, kept in memory when `auth.otp.debug_cache`
/// is enabled. Strictly a non-production diagnostic: issuance writes to it,
/// delivery failures read from it, verification never touches it.
#[derive(Debug, Default)]
pub struct OtpDebugCache {
    codes: Mutex<HashMap<String, String>>,
}

impl OtpDebugCache {
    pub fn store(&self, email: &str, code: &str) {
        let mut codes = self.codes.lock().expect("otp debug cache poisoned");
        codes.insert(email.to_string(), code.to_string());
    }

    pub fn get(&self, email: &str) -> Option<String> {
        let codes = self.codes.lock().expect("otp debug cache poisoned");
        codes.get(email).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id: Uuid = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }

    #[test]
    fn test_otp_debug_cache_overwrites_previous_code() {
        let cache = OtpDebugCache::default();
        cache.store("a@example.com", "111111");
        cache.store("a@example.com", "222222");
        assert_eq!(cache.get("a@example.com").as_deref(), Some("222222"));
        assert_eq!(cache.get("b@example.com"), None);
    }
}
