//! Request principal.
//!
//! Authentication happens upstream. The gateway forwards the authenticated
//! user id in the `x-user-id` header and this extractor resolves it against
//! the users table on every request.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::{Error, Result};
use crate::state::AppState;
use crate::storage::{UserRecord, ADMIN_ROLE_ID};

/// Header carrying the authenticated user id.
pub const USER_HEADER: &str = "x-user-id";

/// The authenticated user behind a request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: UserRecord,
}

impl Principal {
    pub fn id(&self) -> i64 {
        self.user.id
    }

    /// Administrators may open every shipment thread.
    pub fn is_privileged(&self) -> bool {
        self.user.role_id == ADMIN_ROLE_ID
    }
}

impl From<UserRecord> for Principal {
    fn from(user: UserRecord) -> Self {
        Self { user }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or(Error::Unauthorized)?;

        let user = state.db.get_user(user_id)?.ok_or(Error::Unauthorized)?;
        Ok(Principal::from(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ServerConfig;
    use crate::storage::{Database, NewUser};
    use axum::http::Request;

    fn state() -> AppState {
        AppState::new(Database::open(None).unwrap(), ServerConfig::default())
    }

    async fn extract(state: &AppState, header: Option<&str>) -> Result<Principal> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(USER_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Principal::from_request_parts(&mut parts, state).await
    }

    #[tokio::test]
    async fn test_known_user_resolves() {
        let state = state();
        let id = state.db.create_user(&NewUser::named("Dewi Sartika").admin()).unwrap();

        let principal = extract(&state, Some(&id.to_string())).await.unwrap();
        assert_eq!(principal.id(), id);
        assert!(principal.is_privileged());
    }

    #[tokio::test]
    async fn test_missing_or_unknown_user_is_unauthorized() {
        let state = state();
        assert!(matches!(extract(&state, None).await, Err(Error::Unauthorized)));
        assert!(matches!(extract(&state, Some("abc")).await, Err(Error::Unauthorized)));
        assert!(matches!(extract(&state, Some("404")).await, Err(Error::Unauthorized)));
    }
}
