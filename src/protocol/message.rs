//! Request and response envelopes.

use serde::{Deserialize, Serialize};

use crate::auth::{Account, AuthError, Credential, Privilege, SignUpInput};
use crate::protocol::ProtocolError;

/// Requested operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Signup,
    Signin,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Signup => "signup",
            Operation::Signin => "signin",
        }
    }
}

/// Outcome reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    ServerError,
    EmailExistsError,
    CredentialError,
    ServerCapacityError,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::ServerError => "SERVER_ERROR",
            Status::EmailExistsError => "EMAIL_EXISTS_ERROR",
            Status::CredentialError => "CREDENTIAL_ERROR",
            Status::ServerCapacityError => "SERVER_CAPACITY_ERROR",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&AuthError> for Status {
    fn from(err: &AuthError) -> Self {
        match err {
            AuthError::EmailExists => Status::EmailExistsError,
            AuthError::InvalidCredential => Status::CredentialError,
            AuthError::StoreUnavailable(_)
            | AuthError::TransactionFailed(_)
            | AuthError::InvalidRequest(_) => Status::ServerError,
        }
    }
}

impl From<&ProtocolError> for Status {
    fn from(_: &ProtocolError) -> Self {
        Status::ServerError
    }
}

/// Account fields as sent by clients. Sign-in needs only the credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPayload {
    pub identifier: String,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privilege: Option<Privilege>,
}

/// One client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub operation: Operation,
    pub account: AccountPayload,
}

/// A request resolved into typed service input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SignUp(SignUpInput),
    SignIn(Credential),
}

impl Request {
    pub fn sign_up(input: &SignUpInput) -> Self {
        Self {
            operation: Operation::Signup,
            account: AccountPayload {
                identifier: input.credential.identifier.clone(),
                secret: input.credential.secret.clone(),
                name: Some(input.name.clone()),
                street: Some(input.street.clone()),
                zip: Some(input.zip.clone()),
                city: Some(input.city.clone()),
                privilege: Some(input.privilege),
            },
        }
    }

    pub fn sign_in(credential: &Credential) -> Self {
        Self {
            operation: Operation::Signin,
            account: AccountPayload {
                identifier: credential.identifier.clone(),
                secret: credential.secret.clone(),
                ..AccountPayload::default()
            },
        }
    }

    /// Check that the operation's required fields are present.
    pub fn into_command(self) -> Result<Command, AuthError> {
        let AccountPayload {
            identifier,
            secret,
            name,
            street,
            zip,
            city,
            privilege,
        } = self.account;
        let credential = Credential { identifier, secret };

        match self.operation {
            Operation::Signin => Ok(Command::SignIn(credential)),
            Operation::Signup => Ok(Command::SignUp(SignUpInput {
                credential,
                name: required(name, "name")?,
                street: required(street, "street")?,
                zip: required(zip, "zip")?,
                city: required(city, "city")?,
                privilege: required(privilege, "privilege")?,
            })),
        }
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, AuthError> {
    value.ok_or_else(|| AuthError::InvalidRequest(format!("sign-up requires '{}'", field)))
}

/// One server response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub account: Option<Account>,
    pub status: Status,
}

impl Response {
    pub fn ok(account: Account) -> Self {
        Self {
            account: Some(account),
            status: Status::Ok,
        }
    }

    pub fn error(status: Status) -> Self {
        Self {
            account: None,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn status_wire_names() {
        assert_eq!(serde_json::to_string(&Status::Ok).unwrap(), "\"OK\"");
        assert_eq!(
            serde_json::to_string(&Status::ServerCapacityError).unwrap(),
            "\"SERVER_CAPACITY_ERROR\""
        );
        assert_eq!(
            serde_json::to_string(&Status::EmailExistsError).unwrap(),
            format!("\"{}\"", Status::EmailExistsError)
        );
    }

    #[test]
    fn every_auth_error_has_one_status() {
        assert_eq!(Status::from(&AuthError::EmailExists), Status::EmailExistsError);
        assert_eq!(Status::from(&AuthError::InvalidCredential), Status::CredentialError);
        assert_eq!(
            Status::from(&AuthError::StoreUnavailable(StoreError::Timeout)),
            Status::ServerError
        );
        assert_eq!(
            Status::from(&AuthError::TransactionFailed("x".into())),
            Status::ServerError
        );
        assert_eq!(
            Status::from(&AuthError::InvalidRequest("x".into())),
            Status::ServerError
        );
    }

    #[test]
    fn sign_in_needs_only_credential() {
        let request: Request = serde_json::from_str(
            r#"{"operation":"SIGNIN","account":{"identifier":"a@x.com","secret":"p"}}"#,
        )
        .unwrap();

        assert_eq!(
            request.into_command().unwrap(),
            Command::SignIn(Credential {
                identifier: "a@x.com".into(),
                secret: "p".into(),
            })
        );
    }

    #[test]
    fn sign_up_requires_every_field() {
        let request: Request = serde_json::from_str(
            r#"{"operation":"SIGNUP","account":{"identifier":"a@x.com","secret":"p","name":"Ada"}}"#,
        )
        .unwrap();

        let err = request.into_command().unwrap_err();
        assert!(err.to_string().contains("street"));
    }

    #[test]
    fn unknown_operation_does_not_parse() {
        let parsed = serde_json::from_str::<Request>(
            r#"{"operation":"DELETE","account":{"identifier":"a@x.com","secret":"p"}}"#,
        );
        assert!(parsed.is_err());
    }
}
