//! Account settings.
//!
//! Credentials are owned by the auth provider, which this client has no
//! write access to. Both operations validate their input and then report
//! that they are not available.

use tracing::info;

use cliquest_shared::constants::MIN_PASSWORD_LEN;
use cliquest_shared::ValidationError;

use crate::error::{ClientError, Result};
use crate::session::Session;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordChange {
    pub current: String,
    pub new: String,
    pub confirm: String,
}

impl PasswordChange {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.current.is_empty() {
            return Err(ValidationError::MissingField("current password"));
        }
        if self.new != self.confirm {
            return Err(ValidationError::PasswordMismatch);
        }
        if self.new.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::PasswordTooShort(MIN_PASSWORD_LEN));
        }
        Ok(())
    }
}

pub async fn change_password(session: &Session, change: PasswordChange) -> Result<()> {
    change.validate()?;
    info!(user = %session.uid().short(), "Password change requested");
    Err(ClientError::Unsupported("password change"))
}

/// Account deletion needs the user to type their own user id to confirm.
pub async fn delete_account(session: &Session, confirmation: &str) -> Result<()> {
    if confirmation.trim() != session.uid().as_str() {
        return Err(ValidationError::MissingField("confirmation").into());
    }
    info!(user = %session.uid().short(), "Account deletion requested");
    Err(ClientError::Unsupported("account deletion"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::test_session;

    fn change(new: &str, confirm: &str) -> PasswordChange {
        PasswordChange {
            current: "old-secret".into(),
            new: new.into(),
            confirm: confirm.into(),
        }
    }

    #[tokio::test]
    async fn test_password_change_validates_before_reporting_unsupported() {
        let (session, gateway, _events) = test_session("alice");
        assert!(matches!(
            change_password(&session, change("abcdefg", "abcdefh")).await,
            Err(ClientError::Validation(ValidationError::PasswordMismatch))
        ));
        assert!(matches!(
            change_password(&session, change("abc", "abc")).await,
            Err(ClientError::Validation(ValidationError::PasswordTooShort(_)))
        ));
        assert!(matches!(
            change_password(&session, change("abcdefg", "abcdefg")).await,
            Err(ClientError::Unsupported(_))
        ));
        assert_eq!(gateway.write_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_account_requires_confirmation() {
        let (session, _gateway, _events) = test_session("alice");
        assert!(delete_account(&session, "bob").await.unwrap_err().is_validation());
        assert!(matches!(
            delete_account(&session, " alice ").await,
            Err(ClientError::Unsupported(_))
        ));
    }
}
