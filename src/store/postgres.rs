//! PostgreSQL store over sqlx.
//!
//! Every statement binds its inputs; nothing is built by concatenating
//! request data. Ids are cast to BIGINT so both `serial` and `bigserial`
//! schemas decode into `i64`.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Postgres, QueryBuilder, Row};

use crate::auth::model::{AccountRecord, InsertedPartner, NewAccount, NewPartner, Privilege};
use crate::config::StoreConfig;
use crate::store::{Connector, StoreConnection, StoreError, StoreResult};

const SAVEPOINT: &str = "SAVEPOINT sign_up";
const ROLLBACK_TO_SAVEPOINT: &str = "ROLLBACK TO SAVEPOINT sign_up";

const SELECT_ACCOUNT_ID: &str = "SELECT id::BIGINT FROM res_users WHERE login = $1";

const INSERT_PARTNER: &str = r#"
    INSERT INTO res_partner (company_id, name, street, zip, city, email, active, create_date)
    VALUES ($1, $2, $3, $4, $5, $6, TRUE, LOCALTIMESTAMP)
    RETURNING id::BIGINT AS id, create_date AS created_at
"#;

const INSERT_ACCOUNT: &str = r#"
    INSERT INTO res_users (company_id, partner_id, active, login, password, privilege, notification_type, create_date)
    VALUES ($1, $2, TRUE, $3, $4, $5, 'email', $6)
    RETURNING id::BIGINT
"#;

const INSERT_COMPANY_MEMBERSHIP: &str =
    "INSERT INTO res_company_users_rel (cid, user_id) VALUES ($1, $2)";

const SELECT_BY_CREDENTIAL: &str = r#"
    SELECT id::BIGINT AS id, partner_id::BIGINT AS partner_id, login, password,
           privilege::SMALLINT AS privilege, create_date
    FROM res_users
    WHERE login = $1 AND password = $2
"#;

const SELECT_PARTNER_NAME: &str = r#"
    SELECT p.name
    FROM res_partner p
    JOIN res_users u ON u.partner_id = p.id
    WHERE u.login = $1
"#;

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS res_partner (
        id SERIAL PRIMARY KEY,
        company_id INTEGER NOT NULL,
        name VARCHAR NOT NULL,
        street VARCHAR,
        zip VARCHAR,
        city VARCHAR,
        email VARCHAR,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        create_date TIMESTAMP NOT NULL DEFAULT LOCALTIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS res_users (
        id SERIAL PRIMARY KEY,
        company_id INTEGER NOT NULL,
        partner_id INTEGER NOT NULL REFERENCES res_partner(id),
        active BOOLEAN NOT NULL DEFAULT TRUE,
        login VARCHAR NOT NULL UNIQUE,
        password VARCHAR NOT NULL,
        privilege SMALLINT NOT NULL DEFAULT 0,
        notification_type VARCHAR NOT NULL DEFAULT 'email',
        create_date TIMESTAMP NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS res_groups_users_rel (
        gid INTEGER NOT NULL,
        uid INTEGER NOT NULL REFERENCES res_users(id) ON DELETE CASCADE,
        PRIMARY KEY (gid, uid)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS res_company_users_rel (
        cid INTEGER NOT NULL,
        user_id INTEGER NOT NULL REFERENCES res_users(id) ON DELETE CASCADE,
        PRIMARY KEY (cid, user_id)
    )
    "#,
];

/// Opens `PgConnection`s to the configured endpoint.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        let mut options = PgConnectOptions::from_str(&config.url)
            .map_err(|e| StoreError::Connect(format!("invalid store url: {}", e)))?;
        if let Some(username) = &config.username {
            options = options.username(username);
        }
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        Ok(Self { options })
    }

    /// Create the four tables if they do not exist yet.
    pub async fn bootstrap_schema(&self) -> StoreResult<()> {
        let mut conn = PgConnection::connect_with(&self.options).await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut conn).await?;
        }
        conn.close().await?;
        tracing::info!("Store schema bootstrap complete");
        Ok(())
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> StoreResult<Box<dyn StoreConnection>> {
        let conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;
        Ok(Box::new(PgStoreConnection { conn }))
    }
}

/// A pooled PostgreSQL connection.
#[derive(Debug)]
pub struct PgStoreConnection {
    conn: PgConnection,
}

impl PgStoreConnection {
    async fn execute(&mut self, statement: &str) -> StoreResult<()> {
        sqlx::query(statement).execute(&mut self.conn).await?;
        Ok(())
    }
}

#[async_trait]
impl StoreConnection for PgStoreConnection {
    async fn ping(&mut self) -> StoreResult<()> {
        self.conn.ping().await?;
        Ok(())
    }

    async fn begin(&mut self) -> StoreResult<()> {
        self.execute("BEGIN").await?;
        if let Err(e) = self.execute(SAVEPOINT).await {
            // The caller only tracks a transaction after begin succeeds.
            self.execute("ROLLBACK").await?;
            return Err(e);
        }
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.execute("COMMIT").await
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        // Returning to the savepoint fails when the transaction is already
        // aborted; ROLLBACK still ends it either way.
        if let Err(e) = self.execute(ROLLBACK_TO_SAVEPOINT).await {
            tracing::debug!(error = %e, "Rollback to savepoint failed");
        }
        self.execute("ROLLBACK").await
    }

    async fn find_account_id(&mut self, login: &str) -> StoreResult<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(SELECT_ACCOUNT_ID)
            .bind(login)
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(id)
    }

    async fn insert_partner(&mut self, partner: &NewPartner) -> StoreResult<Option<InsertedPartner>> {
        let inserted = sqlx::query_as::<_, InsertedPartner>(INSERT_PARTNER)
            .bind(partner.company_id)
            .bind(&partner.name)
            .bind(&partner.street)
            .bind(&partner.zip)
            .bind(&partner.city)
            .bind(&partner.email)
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(inserted)
    }

    async fn insert_account(&mut self, account: &NewAccount) -> StoreResult<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(INSERT_ACCOUNT)
            .bind(account.company_id)
            .bind(account.partner_id)
            .bind(&account.login)
            .bind(&account.secret)
            .bind(account.privilege.ordinal())
            .bind(account.created_at)
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(id)
    }

    async fn insert_group_memberships(&mut self, account_id: i64, group_ids: &[i64]) -> StoreResult<u64> {
        if group_ids.is_empty() {
            return Ok(0);
        }
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("INSERT INTO res_groups_users_rel (gid, uid) ");
        builder.push_values(group_ids, |mut row, gid| {
            row.push_bind(*gid).push_bind(account_id);
        });
        let result = builder.build().execute(&mut self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn insert_company_membership(&mut self, company_id: i64, account_id: i64) -> StoreResult<u64> {
        let result = sqlx::query(INSERT_COMPANY_MEMBERSHIP)
            .bind(company_id)
            .bind(account_id)
            .execute(&mut self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_by_credential(&mut self, login: &str, secret: &str) -> StoreResult<Option<AccountRecord>> {
        let row = sqlx::query(SELECT_BY_CREDENTIAL)
            .bind(login)
            .bind(secret)
            .fetch_optional(&mut self.conn)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let ordinal: i16 = row.try_get("privilege")?;
        let privilege = Privilege::from_ordinal(ordinal)
            .ok_or_else(|| StoreError::Query(format!("unknown privilege {}", ordinal)))?;
        let created_at: NaiveDateTime = row.try_get("create_date")?;

        Ok(Some(AccountRecord {
            id: row.try_get("id")?,
            partner_id: row.try_get("partner_id")?,
            login: row.try_get("login")?,
            secret: row.try_get("password")?,
            privilege,
            created_at,
        }))
    }

    async fn partner_name(&mut self, login: &str) -> StoreResult<Option<String>> {
        let name = sqlx::query_scalar::<_, String>(SELECT_PARTNER_NAME)
            .bind(login)
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(name)
    }

    async fn close(self: Box<Self>) -> StoreResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}
