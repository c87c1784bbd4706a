//! Account domain types.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::auth::error::AuthError;

/// Role of an account. Stored by ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Privilege {
    User,
    Admin,
}

impl Privilege {
    pub fn ordinal(self) -> i16 {
        match self {
            Privilege::User => 0,
            Privilege::Admin => 1,
        }
    }

    pub fn from_ordinal(value: i16) -> Option<Self> {
        match value {
            0 => Some(Privilege::User),
            1 => Some(Privilege::Admin),
            _ => None,
        }
    }
}

/// Identifier and secret presented at sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub identifier: String,
    pub secret: String,
}

impl Credential {
    pub fn validate(&self) -> Result<(), AuthError> {
        validate_identifier(&self.identifier)?;
        if self.secret.is_empty() {
            return Err(AuthError::InvalidRequest("secret is empty".into()));
        }
        Ok(())
    }
}

/// Everything needed to register a new account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpInput {
    pub credential: Credential,
    pub name: String,
    pub street: String,
    pub zip: String,
    pub city: String,
    pub privilege: Privilege,
}

impl SignUpInput {
    pub fn validate(&self) -> Result<(), AuthError> {
        self.credential.validate()?;
        if self.name.trim().is_empty() {
            return Err(AuthError::InvalidRequest("name is empty".into()));
        }
        Ok(())
    }
}

/// A registered account as returned to clients.
///
/// The secret is kept server-side and never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub partner_id: i64,
    pub identifier: String,
    #[serde(skip)]
    pub secret: String,
    pub privilege: Privilege,
    pub created_at: NaiveDateTime,
    /// Display name of the linked partner.
    pub name: Option<String>,
}

/// Partner fields written at sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPartner {
    pub company_id: i64,
    pub name: String,
    pub street: String,
    pub zip: String,
    pub city: String,
    pub email: String,
}

/// Account fields written at sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub company_id: i64,
    pub partner_id: i64,
    pub login: String,
    pub secret: String,
    pub privilege: Privilege,
    pub created_at: NaiveDateTime,
}

/// Id and creation time of a freshly inserted partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct InsertedPartner {
    pub id: i64,
    pub created_at: NaiveDateTime,
}

/// Account row as read back at sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub id: i64,
    pub partner_id: i64,
    pub login: String,
    pub secret: String,
    pub privilege: Privilege,
    pub created_at: NaiveDateTime,
}

impl AccountRecord {
    pub fn into_account(self, name: Option<String>) -> Account {
        Account {
            id: self.id,
            partner_id: self.partner_id,
            identifier: self.login,
            secret: self.secret,
            privilege: self.privilege,
            created_at: self.created_at,
            name,
        }
    }
}

fn validate_identifier(identifier: &str) -> Result<(), AuthError> {
    match identifier.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(AuthError::InvalidRequest(format!(
            "'{}' is not an email address",
            identifier
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(identifier: &str, secret: &str) -> Credential {
        Credential {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }

    #[test]
    fn privilege_ordinals() {
        assert_eq!(Privilege::User.ordinal(), 0);
        assert_eq!(Privilege::Admin.ordinal(), 1);
        assert_eq!(Privilege::from_ordinal(1), Some(Privilege::Admin));
        assert_eq!(Privilege::from_ordinal(5), None);
    }

    #[test]
    fn identifier_must_look_like_email() {
        assert!(credential("a@x.com", "p").validate().is_ok());
        assert!(credential("ax.com", "p").validate().is_err());
        assert!(credential("@x.com", "p").validate().is_err());
        assert!(credential("a@", "p").validate().is_err());
        assert!(credential("a@b@c", "p").validate().is_err());
        assert!(credential("a@x.com", "").validate().is_err());
    }

    #[test]
    fn secret_is_not_serialized() {
        let account = Account {
            id: 3,
            partner_id: 9,
            identifier: "a@x.com".into(),
            secret: "hunter2".into(),
            privilege: Privilege::Admin,
            created_at: chrono::DateTime::from_timestamp(0, 0).unwrap().naive_utc(),
            name: Some("Ada".into()),
        };
        let json = serde_json::to_string(&account).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"privilege\":\"ADMIN\""));
    }
}
