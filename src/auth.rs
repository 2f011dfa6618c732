use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::limits::PUBLIC_USER;
use crate::observability::AUTH_FAILURES_TOTAL;
use crate::owner::OwnerManager;

/// Resolves login passwords per owner account.
///
/// The database name selects the owner; it defaults to the user name, as in
/// PostgreSQL. The `public` user logs in with the shared booking-link
/// password, every other user must be registered with that owner.
pub struct RentDeskAuthSource {
    owners: Arc<OwnerManager>,
    public_password: String,
}

impl RentDeskAuthSource {
    pub fn new(owners: Arc<OwnerManager>, public_password: String) -> Self {
        Self {
            owners,
            public_password,
        }
    }
}

impl std::fmt::Debug for RentDeskAuthSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RentDeskAuthSource")
            .field("owners", &self.owners.loaded())
            .finish_non_exhaustive()
    }
}

/// Owner selected by a session: the database name, or the user name if unset.
pub fn session_owner<'a>(user: &'a str, database: Option<&'a str>) -> &'a str {
    database.filter(|db| !db.is_empty()).unwrap_or(user)
}

fn auth_failed(reason: &'static str, user: &str) -> PgWireError {
    metrics::counter!(AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
    tracing::warn!(user, reason, "authentication failed");
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "FATAL".into(),
        "28P01".into(),
        format!("password authentication failed for user \"{user}\""),
    )))
}

#[async_trait]
impl AuthSource for RentDeskAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        if user.is_empty() {
            return Err(auth_failed("no_user", user));
        }
        if user == PUBLIC_USER {
            return Ok(Password::new(None, self.public_password.as_bytes().to_vec()));
        }

        let owner = session_owner(user, login.database());
        let engine = self.owners.get_or_create(owner).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "3D000".into(),
                format!("owner account error: {e}"),
            )))
        })?;
        match engine.password_for(user).await {
            Some(password) => Ok(Password::new(None, password.into_bytes())),
            None => Err(auth_failed("unknown_user", user)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_owner_defaults_to_user() {
        assert_eq!(session_owner("alice", None), "alice");
        assert_eq!(session_owner("alice", Some("")), "alice");
        assert_eq!(session_owner("alice", Some("acme")), "acme");
    }
}
