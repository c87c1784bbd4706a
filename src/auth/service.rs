//! Sign-up and sign-in workflows.
//!
//! # Responsibilities
//! - Register an account across the four tables in one transaction
//! - Resolve a credential to an account and its partner name
//! - Borrow exactly one pooled connection per call and always give it back
//!
//! The service holds no per-request state; all sharing goes through the pool.

use std::sync::Arc;

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::model::{Account, Credential, NewAccount, NewPartner, Privilege, SignUpInput};
use crate::config::GroupsConfig;
use crate::store::{ConnectionPool, PooledConnection, StoreError};

/// Group ids attached to new accounts, per privilege.
#[derive(Debug, Clone)]
pub struct GroupMapping {
    user: Vec<i64>,
    admin: Vec<i64>,
}

impl GroupMapping {
    pub fn new(user: Vec<i64>, admin_extra: Vec<i64>) -> Self {
        let mut admin: Vec<i64> = user.iter().chain(&admin_extra).copied().collect();
        admin.sort_unstable();
        Self { user, admin }
    }

    /// The full set for `privilege`. ADMIN always includes the USER set.
    pub fn for_privilege(&self, privilege: Privilege) -> &[i64] {
        match privilege {
            Privilege::User => &self.user,
            Privilege::Admin => &self.admin,
        }
    }
}

impl From<&GroupsConfig> for GroupMapping {
    fn from(config: &GroupsConfig) -> Self {
        Self::new(config.user.clone(), config.admin_extra.clone())
    }
}

impl Default for GroupMapping {
    fn default() -> Self {
        Self::from(&GroupsConfig::default())
    }
}

/// Executes sign-up and sign-in against the store.
#[derive(Debug, Clone)]
pub struct AuthService {
    pool: Arc<ConnectionPool>,
    groups: GroupMapping,
    company_id: i64,
}

impl AuthService {
    pub fn new(pool: Arc<ConnectionPool>, groups: GroupMapping, company_id: i64) -> Self {
        Self {
            pool,
            groups,
            company_id,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Register a new account.
    ///
    /// Partner, account, group memberships and company membership are written
    /// in one transaction. Any failure rolls the whole transaction back before
    /// the error is returned.
    pub async fn sign_up(&self, input: SignUpInput) -> AuthResult<Account> {
        input.validate()?;

        let mut conn = self.pool.borrow().await.map_err(AuthError::StoreUnavailable)?;
        conn.begin_transaction().await.map_err(AuthError::StoreUnavailable)?;

        let result = self.write_account(&mut conn, &input).await;
        let result = match result {
            Ok(account) => match conn.commit_transaction().await {
                Ok(()) => Ok(account),
                Err(e) => Err(AuthError::TransactionFailed(format!("commit: {}", e))),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(account) => {
                tracing::info!(
                    account_id = account.id,
                    partner_id = account.partner_id,
                    privilege = ?account.privilege,
                    "Account registered"
                );
                Ok(account)
            }
            Err(err) => {
                if let Err(e) = conn.rollback_transaction().await {
                    tracing::warn!(error = %e, "Rollback failed, discarding connection");
                    conn.discard();
                }
                tracing::debug!(error = %err, "Sign-up rolled back");
                Err(err)
            }
        }
    }

    async fn write_account(&self, conn: &mut PooledConnection, input: &SignUpInput) -> AuthResult<Account> {
        let login = &input.credential.identifier;

        let existing = conn.find_account_id(login).await.map_err(transaction_failed("account lookup"))?;
        if existing.is_some() {
            return Err(AuthError::EmailExists);
        }

        let partner = NewPartner {
            company_id: self.company_id,
            name: input.name.clone(),
            street: input.street.clone(),
            zip: input.zip.clone(),
            city: input.city.clone(),
            email: login.clone(),
        };
        let partner = conn
            .insert_partner(&partner)
            .await
            .map_err(transaction_failed("partner insert"))?
            .ok_or_else(|| AuthError::TransactionFailed("partner insert affected no rows".into()))?;

        let account = NewAccount {
            company_id: self.company_id,
            partner_id: partner.id,
            login: login.clone(),
            secret: input.credential.secret.clone(),
            privilege: input.privilege,
            created_at: partner.created_at,
        };
        let account_id = match conn.insert_account(&account).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                return Err(AuthError::TransactionFailed("account insert affected no rows".into()))
            }
            Err(StoreError::UniqueViolation(_)) => return Err(AuthError::EmailExists),
            Err(e) => return Err(AuthError::TransactionFailed(format!("account insert: {}", e))),
        };

        let groups = self.groups.for_privilege(input.privilege);
        let written = conn
            .insert_group_memberships(account_id, groups)
            .await
            .map_err(transaction_failed("group membership insert"))?;
        if written != groups.len() as u64 {
            return Err(AuthError::TransactionFailed(format!(
                "group membership insert wrote {} of {} rows",
                written,
                groups.len()
            )));
        }

        let written = conn
            .insert_company_membership(self.company_id, account_id)
            .await
            .map_err(transaction_failed("company membership insert"))?;
        if written == 0 {
            return Err(AuthError::TransactionFailed("company membership insert affected no rows".into()));
        }

        Ok(Account {
            id: account_id,
            partner_id: partner.id,
            identifier: account.login,
            secret: account.secret,
            privilege: account.privilege,
            created_at: partner.created_at,
            name: Some(input.name.clone()),
        })
    }

    /// Resolve a credential to its account, with the partner's display name.
    ///
    /// A credential no account could match fails as `InvalidCredential`
    /// without reaching the store.
    pub async fn sign_in(&self, credential: Credential) -> AuthResult<Account> {
        if let Err(e) = credential.validate() {
            tracing::debug!(error = %e, "Unmatchable credential");
            return Err(AuthError::InvalidCredential);
        }

        let mut conn = self.pool.borrow().await.map_err(AuthError::StoreUnavailable)?;

        let record = conn
            .find_by_credential(&credential.identifier, &credential.secret)
            .await
            .map_err(AuthError::StoreUnavailable)?
            .ok_or(AuthError::InvalidCredential)?;

        let name = conn
            .partner_name(&record.login)
            .await
            .map_err(AuthError::StoreUnavailable)?;

        tracing::debug!(account_id = record.id, "Credential accepted");
        Ok(record.into_account(name))
    }
}

fn transaction_failed(step: &'static str) -> impl Fn(StoreError) -> AuthError {
    move |e| AuthError::TransactionFailed(format!("{}: {}", step, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::store::memory::{Fault, MemoryStore, RowCounts};

    fn service(store: &MemoryStore) -> AuthService {
        let pool = ConnectionPool::new(Arc::new(store.clone()), PoolConfig::default());
        AuthService::new(pool, GroupMapping::default(), 1)
    }

    fn sign_up_input(identifier: &str, privilege: Privilege) -> SignUpInput {
        SignUpInput {
            credential: Credential {
                identifier: identifier.into(),
                secret: "p".into(),
            },
            name: "Ada Lovelace".into(),
            street: "Main St 1".into(),
            zip: "48001".into(),
            city: "Bilbao".into(),
            privilege,
        }
    }

    #[test]
    fn admin_groups_extend_user_groups() {
        let groups = GroupMapping::default();
        assert_eq!(groups.for_privilege(Privilege::User), &[1, 7, 8, 9]);
        assert_eq!(groups.for_privilege(Privilege::Admin), &[1, 2, 3, 4, 7, 8, 9]);
    }

    #[tokio::test]
    async fn user_sign_up_writes_four_groups() {
        let store = MemoryStore::new();
        let auth = service(&store);

        let account = auth.sign_up(sign_up_input("a@x.com", Privilege::User)).await.unwrap();

        assert_eq!(account.identifier, "a@x.com");
        assert_eq!(account.privilege, Privilege::User);
        assert_eq!(store.group_ids(account.id), vec![1, 7, 8, 9]);
        assert_eq!(store.company_ids(account.id), vec![1]);
        assert_eq!(
            store.row_counts(),
            RowCounts {
                partners: 1,
                accounts: 1,
                group_memberships: 4,
                company_memberships: 1,
            }
        );
    }

    #[tokio::test]
    async fn admin_sign_up_writes_seven_groups() {
        let store = MemoryStore::new();
        let auth = service(&store);

        let account = auth.sign_up(sign_up_input("root@x.com", Privilege::Admin)).await.unwrap();

        assert_eq!(store.group_ids(account.id), vec![1, 2, 3, 4, 7, 8, 9]);
        assert_eq!(store.row_counts().company_memberships, 1);
    }

    #[tokio::test]
    async fn duplicate_identifier_is_rejected_without_writes() {
        let store = MemoryStore::new();
        let auth = service(&store);
        auth.sign_up(sign_up_input("a@x.com", Privilege::User)).await.unwrap();
        let before = store.row_counts();

        let err = auth.sign_up(sign_up_input("a@x.com", Privilege::Admin)).await.unwrap_err();

        assert!(matches!(err, AuthError::EmailExists));
        assert_eq!(store.row_counts(), before);
        assert_eq!(auth.pool().idle_count(), 1);
    }

    #[tokio::test]
    async fn failure_at_any_write_leaves_no_rows() {
        for fault in [
            Fault::InsertPartner,
            Fault::PartnerNoRows,
            Fault::InsertAccount,
            Fault::AccountNoRows,
            Fault::InsertGroupMemberships,
            Fault::GroupMembershipsShort,
            Fault::InsertCompanyMembership,
            Fault::Commit,
        ] {
            let store = MemoryStore::new();
            let auth = service(&store);
            store.inject(fault);

            let err = auth.sign_up(sign_up_input("a@x.com", Privilege::Admin)).await.unwrap_err();

            assert!(matches!(err, AuthError::TransactionFailed(_)), "{:?}: {:?}", fault, err);
            assert_eq!(store.row_counts(), RowCounts::default(), "{:?}", fault);
            assert_eq!(auth.pool().idle_count(), 1, "{:?}", fault);
        }
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() {
        let store = MemoryStore::new();
        store.inject(Fault::Connect);
        let auth = service(&store);

        let err = auth.sign_up(sign_up_input("a@x.com", Privilege::User)).await.unwrap_err();
        assert!(matches!(err, AuthError::StoreUnavailable(_)));

        let err = auth
            .sign_in(Credential {
                identifier: "a@x.com".into(),
                secret: "p".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn sign_in_returns_partner_name() {
        let store = MemoryStore::new();
        let auth = service(&store);
        let created = auth.sign_up(sign_up_input("a@x.com", Privilege::User)).await.unwrap();

        let account = auth
            .sign_in(Credential {
                identifier: "a@x.com".into(),
                secret: "p".into(),
            })
            .await
            .unwrap();

        assert_eq!(account.id, created.id);
        assert_eq!(account.identifier, "a@x.com");
        assert_eq!(account.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(account.created_at, created.created_at);
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid_credential() {
        let store = MemoryStore::new();
        let auth = service(&store);
        auth.sign_up(sign_up_input("a@x.com", Privilege::User)).await.unwrap();

        let err = auth
            .sign_in(Credential {
                identifier: "a@x.com".into(),
                secret: "nope".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidCredential));
        assert_eq!(auth.pool().idle_count(), 1);
    }

    #[tokio::test]
    async fn malformed_credential_is_invalid_credential() {
        let store = MemoryStore::new();
        let auth = service(&store);

        for (identifier, secret) in [("legacy-login", "x"), ("a@x.com", "")] {
            let err = auth
                .sign_in(Credential {
                    identifier: identifier.into(),
                    secret: secret.into(),
                })
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredential), "{}: {:?}", identifier, err);
        }
        assert_eq!(store.opened(), 0);
    }

    #[tokio::test]
    async fn invalid_input_never_touches_the_store() {
        let store = MemoryStore::new();
        let auth = service(&store);

        let err = auth.sign_up(sign_up_input("not-an-email", Privilege::User)).await.unwrap_err();

        assert!(matches!(err, AuthError::InvalidRequest(_)));
        assert_eq!(store.opened(), 0);
    }

    #[tokio::test]
    async fn concurrent_duplicate_sign_ups_yield_one_account() {
        let store = MemoryStore::new();
        // Both requests pass the existence check before either inserts.
        store.set_latency(std::time::Duration::from_millis(20));
        let auth = service(&store);

        let (a, b) = tokio::join!(
            auth.sign_up(sign_up_input("race@x.com", Privilege::User)),
            auth.sign_up(sign_up_input("race@x.com", Privilege::User)),
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(AuthError::EmailExists))));
        assert_eq!(store.row_counts().accounts, 1);
        assert_eq!(store.row_counts().partners, 1);
    }
}
