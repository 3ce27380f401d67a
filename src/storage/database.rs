use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;

use super::{AlertPreferences, BlacklistEntry, ItemSnapshot, StorageResult, Store};
use crate::api::{AccountId, Credentials};

#[derive(Debug, sqlx::FromRow)]
struct CredentialsRow {
    account_id: String,
    credentials: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PreferencesRow {
    account_id: String,
    sold_out: bool,
    new_stock: bool,
    stock_reduced: bool,
    stock_increased: bool,
}

impl PreferencesRow {
    fn into_entry(self) -> (AccountId, AlertPreferences) {
        (
            AccountId::new(self.account_id),
            AlertPreferences {
                sold_out: self.sold_out,
                new_stock: self.new_stock,
                stock_reduced: self.stock_reduced,
                stock_increased: self.stock_increased,
            },
        )
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    item_data: String,
}

#[derive(Debug, sqlx::FromRow)]
struct BlacklistRow {
    account_id: String,
    store_id: String,
    store_name: String,
    added_at: DateTime<Utc>,
}

impl From<BlacklistRow> for BlacklistEntry {
    fn from(row: BlacklistRow) -> Self {
        BlacklistEntry {
            account: AccountId::new(row.account_id),
            store_id: row.store_id,
            store_name: row.store_name,
            added_at: row.added_at,
        }
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_path: &str) -> StorageResult<Self> {
        let in_memory = database_path.contains(":memory:");

        let connection_string = if database_path.starts_with("sqlite:") {
            database_path.to_string()
        } else {
            if let Some(parent) = Path::new(database_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            format!("sqlite://{}?mode=rwc", database_path)
        };

        // An in-memory database lives and dies with its single connection.
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options.connect(&connection_string).await?;

        let store = Self { pool };
        store.initialize_schema().await?;

        Ok(store)
    }

    async fn initialize_schema(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_credentials (
                account_id TEXT PRIMARY KEY,
                credentials TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alert_preferences (
                account_id TEXT PRIMARY KEY,
                sold_out INTEGER NOT NULL DEFAULT 0,
                new_stock INTEGER NOT NULL DEFAULT 1,
                stock_reduced INTEGER NOT NULL DEFAULT 0,
                stock_increased INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS item_snapshots (
                item_id TEXT PRIMARY KEY,
                store_id TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                item_data TEXT NOT NULL,
                observed_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blacklisted_stores (
                account_id TEXT NOT NULL,
                store_id TEXT NOT NULL,
                store_name TEXT NOT NULL,
                added_at DATETIME NOT NULL,
                PRIMARY KEY (account_id, store_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("✅ Database schema initialized");

        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn all_credentials(&self) -> StorageResult<HashMap<AccountId, Credentials>> {
        let rows = sqlx::query_as::<_, CredentialsRow>(
            "SELECT account_id, credentials FROM account_credentials",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> StorageResult<(AccountId, Credentials)> {
                let credentials = serde_json::from_str(&row.credentials)?;
                Ok((AccountId::new(row.account_id), credentials))
            })
            .collect()
    }

    async fn credentials(&self, account: &AccountId) -> StorageResult<Option<Credentials>> {
        let row = sqlx::query_as::<_, CredentialsRow>(
            "SELECT account_id, credentials FROM account_credentials WHERE account_id = ?",
        )
        .bind(account.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.credentials)?)),
            None => Ok(None),
        }
    }

    async fn upsert_credentials(&self, entries: &[(AccountId, Credentials)]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        for (account, credentials) in entries {
            sqlx::query(
                r#"
                INSERT INTO account_credentials (account_id, credentials, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(account_id) DO UPDATE SET
                    credentials = excluded.credentials,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(account.as_str())
            .bind(serde_json::to_string(credentials)?)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn all_preferences(&self) -> StorageResult<HashMap<AccountId, AlertPreferences>> {
        let rows = sqlx::query_as::<_, PreferencesRow>("SELECT * FROM alert_preferences")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(PreferencesRow::into_entry).collect())
    }

    async fn preferences(&self, account: &AccountId) -> StorageResult<Option<AlertPreferences>> {
        let row = sqlx::query_as::<_, PreferencesRow>(
            "SELECT * FROM alert_preferences WHERE account_id = ?",
        )
        .bind(account.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.into_entry().1))
    }

    async fn upsert_preferences(
        &self,
        entries: &[(AccountId, AlertPreferences)],
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        for (account, prefs) in entries {
            sqlx::query(
                r#"
                INSERT INTO alert_preferences (
                    account_id, sold_out, new_stock, stock_reduced, stock_increased
                )
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(account_id) DO UPDATE SET
                    sold_out = excluded.sold_out,
                    new_stock = excluded.new_stock,
                    stock_reduced = excluded.stock_reduced,
                    stock_increased = excluded.stock_increased
                "#,
            )
            .bind(account.as_str())
            .bind(prefs.sold_out)
            .bind(prefs.new_stock)
            .bind(prefs.stock_reduced)
            .bind(prefs.stock_increased)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn all_snapshots(&self) -> StorageResult<HashMap<String, ItemSnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>("SELECT item_data FROM item_snapshots")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| -> StorageResult<(String, ItemSnapshot)> {
                let snapshot: ItemSnapshot = serde_json::from_str(&row.item_data)?;
                Ok((snapshot.item_id.clone(), snapshot))
            })
            .collect()
    }

    async fn snapshot(&self, item_id: &str) -> StorageResult<Option<ItemSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            "SELECT item_data FROM item_snapshots WHERE item_id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.item_data)?)),
            None => Ok(None),
        }
    }

    async fn upsert_snapshots(&self, snapshots: &[ItemSnapshot]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        for snapshot in snapshots {
            sqlx::query(
                r#"
                INSERT INTO item_snapshots (item_id, store_id, quantity, item_data, observed_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(item_id) DO UPDATE SET
                    store_id = excluded.store_id,
                    quantity = excluded.quantity,
                    item_data = excluded.item_data,
                    observed_at = excluded.observed_at
                "#,
            )
            .bind(&snapshot.item_id)
            .bind(&snapshot.store_id)
            .bind(snapshot.quantity as i64)
            .bind(serde_json::to_string(snapshot)?)
            .bind(snapshot.observed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!("💾 Persisted {} item snapshots", snapshots.len());

        Ok(())
    }

    async fn all_blacklist(&self) -> StorageResult<Vec<BlacklistEntry>> {
        let rows = sqlx::query_as::<_, BlacklistRow>(
            "SELECT * FROM blacklisted_stores ORDER BY account_id, added_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BlacklistEntry::from).collect())
    }

    async fn blacklist(&self, account: &AccountId) -> StorageResult<Vec<BlacklistEntry>> {
        let rows = sqlx::query_as::<_, BlacklistRow>(
            "SELECT * FROM blacklisted_stores WHERE account_id = ? ORDER BY added_at",
        )
        .bind(account.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BlacklistEntry::from).collect())
    }

    async fn is_blacklisted(&self, account: &AccountId, store_id: &str) -> StorageResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM blacklisted_stores WHERE account_id = ? AND store_id = ?",
        )
        .bind(account.as_str())
        .bind(store_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn upsert_blacklist(&self, entries: &[BlacklistEntry]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO blacklisted_stores (account_id, store_id, store_name, added_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(account_id, store_id) DO UPDATE SET
                    store_name = excluded.store_name
                "#,
            )
            .bind(entry.account.as_str())
            .bind(&entry.store_id)
            .bind(&entry.store_name)
            .bind(entry.added_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn remove_blacklist(&self, account: &AccountId, store_id: &str) -> StorageResult<bool> {
        let result =
            sqlx::query("DELETE FROM blacklisted_stores WHERE account_id = ? AND store_id = ?")
                .bind(account.as_str())
                .bind(store_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("🔒 Database connection closed");
    }
}
