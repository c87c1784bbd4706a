//! In-process store.
//!
//! Implements the same four tables and constraints as the PostgreSQL schema:
//! unique account logins and composite membership keys. Writes are applied
//! immediately and recorded in a per-connection undo log; `rollback` replays
//! the log backwards. Uncommitted rows are therefore visible to other
//! connections, and the login constraint is checked eagerly on insert, much
//! like a unique index.
//!
//! Used for local runs (`store.kind = "memory"`) and by the test suite, which
//! relies on its fault injection and counters.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};

use crate::auth::model::{AccountRecord, InsertedPartner, NewAccount, NewPartner};
use crate::store::{Connector, StoreConnection, StoreError, StoreResult};

/// Points at which a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Connect,
    InsertPartner,
    /// The partner insert succeeds but reports zero affected rows.
    PartnerNoRows,
    InsertAccount,
    /// The account insert succeeds but reports zero affected rows.
    AccountNoRows,
    InsertGroupMemberships,
    /// The group batch writes every row but the last.
    GroupMembershipsShort,
    InsertCompanyMembership,
    Commit,
}

/// Row counts across the four tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub partners: usize,
    pub accounts: usize,
    pub group_memberships: usize,
    pub company_memberships: usize,
}

#[derive(Debug, Clone)]
struct PartnerRow {
    name: String,
}

#[derive(Debug, Clone)]
struct AccountRow {
    partner_id: i64,
    login: String,
    secret: String,
    privilege: i16,
    created_at: NaiveDateTime,
}

#[derive(Debug, Default)]
struct Tables {
    partners: BTreeMap<i64, PartnerRow>,
    accounts: BTreeMap<i64, AccountRow>,
    group_memberships: BTreeSet<(i64, i64)>,
    company_memberships: BTreeSet<(i64, i64)>,
    next_partner_id: i64,
    next_account_id: i64,
}

#[derive(Debug)]
enum Undo {
    Partner(i64),
    Account(i64),
    GroupMembership(i64, i64),
    CompanyMembership(i64, i64),
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    faults: Mutex<HashSet<Fault>>,
    latency_ms: AtomicU64,
    generation: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
}

/// Handle to an in-process database. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation at `fault` fail until cleared.
    pub fn inject(&self, fault: Fault) {
        lock(&self.shared.faults).insert(fault);
    }

    pub fn clear_faults(&self) {
        lock(&self.shared.faults).clear();
    }

    /// Delay applied before every statement.
    pub fn set_latency(&self, latency: Duration) {
        self.shared
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Break every connection opened so far, as a server restart would.
    pub fn disconnect_all(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Physical connections opened.
    pub fn opened(&self) -> u64 {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Physical connections closed through `StoreConnection::close`.
    pub fn closed(&self) -> u64 {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn row_counts(&self) -> RowCounts {
        let tables = lock(&self.shared.tables);
        RowCounts {
            partners: tables.partners.len(),
            accounts: tables.accounts.len(),
            group_memberships: tables.group_memberships.len(),
            company_memberships: tables.company_memberships.len(),
        }
    }

    /// Group ids linked to `account_id`, ascending.
    pub fn group_ids(&self, account_id: i64) -> Vec<i64> {
        lock(&self.shared.tables)
            .group_memberships
            .iter()
            .filter(|(_, uid)| *uid == account_id)
            .map(|(gid, _)| *gid)
            .collect()
    }

    /// Company ids linked to `account_id`, ascending.
    pub fn company_ids(&self, account_id: i64) -> Vec<i64> {
        lock(&self.shared.tables)
            .company_memberships
            .iter()
            .filter(|(_, uid)| *uid == account_id)
            .map(|(cid, _)| *cid)
            .collect()
    }
}

#[async_trait]
impl Connector for MemoryStore {
    async fn connect(&self) -> StoreResult<Box<dyn StoreConnection>> {
        if lock(&self.shared.faults).contains(&Fault::Connect) {
            return Err(StoreError::Connect("injected connect failure".into()));
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            generation: self.shared.generation.load(Ordering::SeqCst),
            undo: None,
        }))
    }
}

/// One connection to a `MemoryStore`.
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    generation: u64,
    /// `Some` while a transaction is open.
    undo: Option<Vec<Undo>>,
}

impl MemoryConnection {
    /// Common prologue of every statement: latency, liveness, fault check.
    async fn enter(&self, fault: Option<Fault>) -> StoreResult<()> {
        let latency = self.shared.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.generation != self.shared.generation.load(Ordering::SeqCst) {
            return Err(StoreError::Connect("connection reset".into()));
        }
        if let Some(fault) = fault {
            if lock(&self.shared.faults).contains(&fault) {
                return Err(StoreError::Query(format!("injected fault at {:?}", fault)));
            }
        }
        Ok(())
    }

    fn undo_all(&mut self) {
        let Some(log) = self.undo.take() else {
            return;
        };
        let mut tables = lock(&self.shared.tables);
        for undo in log.into_iter().rev() {
            match undo {
                Undo::Partner(id) => {
                    tables.partners.remove(&id);
                }
                Undo::Account(id) => {
                    tables.accounts.remove(&id);
                }
                Undo::GroupMembership(gid, uid) => {
                    tables.group_memberships.remove(&(gid, uid));
                }
                Undo::CompanyMembership(cid, uid) => {
                    tables.company_memberships.remove(&(cid, uid));
                }
            }
        }
    }

    fn record(&mut self, undo: Undo) {
        if let Some(log) = self.undo.as_mut() {
            log.push(undo);
        }
    }
}

/// A server aborts the open transaction of a connection that goes away.
impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.undo_all();
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn ping(&mut self) -> StoreResult<()> {
        self.enter(None).await
    }

    async fn begin(&mut self) -> StoreResult<()> {
        self.enter(None).await?;
        if self.undo.is_some() {
            return Err(StoreError::Query("transaction already open".into()));
        }
        self.undo = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.enter(Some(Fault::Commit)).await?;
        match self.undo.take() {
            Some(_) => Ok(()),
            None => Err(StoreError::Query("no transaction open".into())),
        }
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.enter(None).await?;
        self.undo_all();
        Ok(())
    }

    async fn find_account_id(&mut self, login: &str) -> StoreResult<Option<i64>> {
        self.enter(None).await?;
        let tables = lock(&self.shared.tables);
        Ok(tables
            .accounts
            .iter()
            .find(|(_, row)| row.login == login)
            .map(|(id, _)| *id))
    }

    async fn insert_partner(&mut self, partner: &NewPartner) -> StoreResult<Option<InsertedPartner>> {
        self.enter(Some(Fault::InsertPartner)).await?;
        if lock(&self.shared.faults).contains(&Fault::PartnerNoRows) {
            return Ok(None);
        }

        let inserted = {
            let mut tables = lock(&self.shared.tables);
            tables.next_partner_id += 1;
            let id = tables.next_partner_id;
            let created_at = Utc::now().naive_utc();
            tables.partners.insert(
                id,
                PartnerRow {
                    name: partner.name.clone(),
                },
            );
            InsertedPartner { id, created_at }
        };
        self.record(Undo::Partner(inserted.id));
        Ok(Some(inserted))
    }

    async fn insert_account(&mut self, account: &NewAccount) -> StoreResult<Option<i64>> {
        self.enter(Some(Fault::InsertAccount)).await?;
        if lock(&self.shared.faults).contains(&Fault::AccountNoRows) {
            return Ok(None);
        }

        let id = {
            let mut tables = lock(&self.shared.tables);
            if !tables.partners.contains_key(&account.partner_id) {
                return Err(StoreError::Query(format!(
                    "partner {} does not exist",
                    account.partner_id
                )));
            }
            if tables.accounts.values().any(|row| row.login == account.login) {
                return Err(StoreError::UniqueViolation(format!(
                    "login '{}' already exists",
                    account.login
                )));
            }
            tables.next_account_id += 1;
            let id = tables.next_account_id;
            tables.accounts.insert(
                id,
                AccountRow {
                    partner_id: account.partner_id,
                    login: account.login.clone(),
                    secret: account.secret.clone(),
                    privilege: account.privilege.ordinal(),
                    created_at: account.created_at,
                },
            );
            id
        };
        self.record(Undo::Account(id));
        Ok(Some(id))
    }

    async fn insert_group_memberships(&mut self, account_id: i64, group_ids: &[i64]) -> StoreResult<u64> {
        self.enter(Some(Fault::InsertGroupMemberships)).await?;
        let group_ids = if lock(&self.shared.faults).contains(&Fault::GroupMembershipsShort) {
            &group_ids[..group_ids.len().saturating_sub(1)]
        } else {
            group_ids
        };

        {
            let mut tables = lock(&self.shared.tables);
            if !tables.accounts.contains_key(&account_id) {
                return Err(StoreError::Query(format!("account {} does not exist", account_id)));
            }
            // One statement: either every row goes in or none does.
            let distinct: BTreeSet<_> = group_ids.iter().collect();
            if distinct.len() != group_ids.len()
                || group_ids
                    .iter()
                    .any(|gid| tables.group_memberships.contains(&(*gid, account_id)))
            {
                return Err(StoreError::UniqueViolation("duplicate group membership".into()));
            }
            for gid in group_ids {
                tables.group_memberships.insert((*gid, account_id));
            }
        }
        for gid in group_ids {
            self.record(Undo::GroupMembership(*gid, account_id));
        }
        Ok(group_ids.len() as u64)
    }

    async fn insert_company_membership(&mut self, company_id: i64, account_id: i64) -> StoreResult<u64> {
        self.enter(Some(Fault::InsertCompanyMembership)).await?;

        {
            let mut tables = lock(&self.shared.tables);
            if !tables.accounts.contains_key(&account_id) {
                return Err(StoreError::Query(format!("account {} does not exist", account_id)));
            }
            if !tables.company_memberships.insert((company_id, account_id)) {
                return Err(StoreError::UniqueViolation("duplicate company membership".into()));
            }
        }
        self.record(Undo::CompanyMembership(company_id, account_id));
        Ok(1)
    }

    async fn find_by_credential(&mut self, login: &str, secret: &str) -> StoreResult<Option<AccountRecord>> {
        self.enter(None).await?;
        let tables = lock(&self.shared.tables);
        let found = tables
            .accounts
            .iter()
            .find(|(_, row)| row.login == login && row.secret == secret);

        let Some((id, row)) = found else {
            return Ok(None);
        };
        let privilege = crate::auth::model::Privilege::from_ordinal(row.privilege)
            .ok_or_else(|| StoreError::Query(format!("unknown privilege {}", row.privilege)))?;
        Ok(Some(AccountRecord {
            id: *id,
            partner_id: row.partner_id,
            login: row.login.clone(),
            secret: row.secret.clone(),
            privilege,
            created_at: row.created_at,
        }))
    }

    async fn partner_name(&mut self, login: &str) -> StoreResult<Option<String>> {
        self.enter(None).await?;
        let tables = lock(&self.shared.tables);
        Ok(tables
            .accounts
            .values()
            .find(|row| row.login == login)
            .and_then(|row| tables.partners.get(&row.partner_id))
            .map(|partner| partner.name.clone()))
    }

    async fn close(self: Box<Self>) -> StoreResult<()> {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
