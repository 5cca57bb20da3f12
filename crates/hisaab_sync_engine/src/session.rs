//! Explicit session passed into every sync call.

use crate::error::{SyncError, SyncResult};

/// The business and user a sync runs for.
///
/// Either half may be absent while the app is still signing in; sync calls
/// reject such sessions with `InvalidSession`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SessionContext {
    /// Active business slug.
    pub business_id: Option<String>,
    /// Signed-in user slug.
    pub user_id: Option<String>,
}

/// A session known to carry both a business and a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    /// Business slug.
    pub business_id: String,
    /// User slug.
    pub user_id: String,
}

impl SessionContext {
    /// Creates a complete session.
    pub fn new(business_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            business_id: Some(business_id.into()),
            user_id: Some(user_id.into()),
        }
    }

    /// Creates a session with nobody signed in.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Validates the session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSession` if the business or user is missing or blank.
    pub fn require_valid(&self) -> SyncResult<SessionKey> {
        let business_id = non_blank(self.business_id.as_deref())
            .ok_or_else(|| SyncError::InvalidSession("no active business".into()))?;
        let user_id = non_blank(self.user_id.as_deref())
            .ok_or_else(|| SyncError::InvalidSession("no signed-in user".into()))?;
        Ok(SessionKey {
            business_id: business_id.to_string(),
            user_id: user_id.to_string(),
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_session_is_valid() {
        let key = SessionContext::new("B1", "U1").require_valid().unwrap();
        assert_eq!(key.business_id, "B1");
        assert_eq!(key.user_id, "U1");
    }

    #[test]
    fn missing_parts_are_rejected() {
        assert!(matches!(
            SessionContext::signed_out().require_valid(),
            Err(SyncError::InvalidSession(_))
        ));
        let half = SessionContext {
            business_id: Some("B1".into()),
            user_id: Some("  ".into()),
        };
        assert!(matches!(half.require_valid(), Err(SyncError::InvalidSession(_))));
    }
}
