//! Admin session carried in the `admin_session` HttpOnly cookie.

pub mod jwt;

use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;

pub use jwt::{SessionClaims, SessionKeys};

pub const SESSION_COOKIE: &str = "admin_session";

const ELEVATED_ROLES: &[&str] = &["admin", "super_admin"];

/// The authenticated operator behind an admin request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminSession {
    pub user_id: String,
    pub email: Option<String>,
    pub role: String,
}

impl AdminSession {
    pub fn is_elevated(&self) -> bool {
        ELEVATED_ROLES.contains(&self.role.as_str())
    }
}

impl From<SessionClaims> for AdminSession {
    fn from(claims: SessionClaims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        }
    }
}

/// Resolve the session from the cookie jar. Missing keys, a missing cookie
/// and an invalid or expired token all yield `None`.
pub fn session_from_jar(keys: Option<&SessionKeys>, jar: &CookieJar) -> Option<AdminSession> {
    let keys = keys?;
    let cookie = jar.get(SESSION_COOKIE)?;
    match keys.validate_session(cookie.value()) {
        Ok(claims) => Some(claims.into()),
        Err(err) => {
            tracing::debug!(error = %err, "admin session rejected");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_extra::extract::cookie::Cookie;

    #[test]
    fn valid_cookie_yields_session() {
        let keys = SessionKeys::from_secret("test-secret");
        let token = keys.sign_session("u-1", Some("ops@example.com"), "admin", 15).unwrap();
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, token));

        let session = session_from_jar(Some(&keys), &jar).unwrap();
        assert_eq!(session.user_id, "u-1");
        assert!(session.is_elevated());
    }

    #[test]
    fn support_role_is_not_elevated() {
        let session = AdminSession {
            user_id: "u-2".into(),
            email: None,
            role: "support".into(),
        };
        assert!(!session.is_elevated());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let other = SessionKeys::from_secret("other");
        let token = other.sign_session("u-1", None, "admin", 15).unwrap();
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, token));

        let keys = SessionKeys::from_secret("test-secret");
        assert!(session_from_jar(Some(&keys), &jar).is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = SessionKeys::from_secret("test-secret");
        let token = keys.sign_session("u-1", None, "admin", -10).unwrap();
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, token));
        assert!(session_from_jar(Some(&keys), &jar).is_none());
    }

    #[test]
    fn no_keys_means_no_session() {
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, "anything"));
        assert!(session_from_jar(None, &jar).is_none());
    }
}
