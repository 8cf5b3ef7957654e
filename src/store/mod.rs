// Persistence module
//
// A single embedded SQLite file holding users, tokens, custom API accounts,
// and sessions. All secret columns are ciphertext; `token_hash`/`api_key_hash`
// are stored as hex digests for lookup. Mutating operations serialize
// through a store-level mutex so multi-statement updates stay atomic on the
// embedded engine (rusqlite's `Connection` is `!Sync`, so this mutex also
// does double duty as the connection guard).

pub mod models;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::crypto::Crypto;
pub use models::*;

pub struct Store {
    conn: Mutex<Connection>,
    crypto: Arc<Crypto>,
}

impl Store {
    pub fn open(path: &Path, crypto: Arc<Crypto>) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open store database: {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
            crypto,
        };
        Ok(store)
    }

    /// Ensure every expected table/column exists, adding missing columns
    /// with a default rather than failing. Safe to call on every startup.
    pub async fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                credential_identifier TEXT NOT NULL UNIQUE,
                password_digest TEXT NOT NULL DEFAULT '',
                api_key_hash TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                token_hash TEXT NOT NULL UNIQUE,
                refresh_token TEXT NOT NULL,
                auth_type TEXT NOT NULL DEFAULT 'social',
                client_id TEXT,
                client_secret TEXT,
                region TEXT NOT NULL DEFAULT 'us-east-1',
                visibility TEXT NOT NULL DEFAULT 'private',
                status TEXT NOT NULL DEFAULT 'active',
                opus_enabled INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                fail_count INTEGER NOT NULL DEFAULT 0,
                last_used TEXT,
                last_check TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS custom_api_accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                name TEXT,
                api_base TEXT NOT NULL,
                api_key TEXT NOT NULL,
                format TEXT NOT NULL,
                provider TEXT,
                model TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                success_count INTEGER NOT NULL DEFAULT 0,
                fail_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                token_hash TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            ",
        )?;

        ensure_columns(
            &conn,
            "tokens",
            &[
                ("opus_enabled", "INTEGER NOT NULL DEFAULT 0"),
                ("last_used", "TEXT"),
                ("last_check", "TEXT"),
            ],
        )?;
        ensure_columns(
            &conn,
            "custom_api_accounts",
            &[("provider", "TEXT"), ("model", "TEXT")],
        )?;

        Ok(())
    }

    // ---------------------------------------------------------------- users

    pub async fn create_user(
        &self,
        credential_identifier: &str,
        password_digest: &str,
        api_key: &str,
    ) -> Result<i64> {
        let api_key_hash = self.crypto.token_hash(api_key);
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (credential_identifier, password_digest, api_key_hash, status, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![
                credential_identifier,
                password_digest,
                api_key_hash,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn get_user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        let hash = self.crypto.token_hash(api_key);
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, credential_identifier, password_digest, api_key_hash, status, created_at
             FROM users WHERE api_key_hash = ?1",
            params![hash],
            row_to_user,
        )
        .optional()
        .context("get_user_by_api_key")
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, credential_identifier, password_digest, api_key_hash, status, created_at
             FROM users WHERE id = ?1",
            params![id],
            row_to_user,
        )
        .optional()
        .context("get_user")
    }

    // --------------------------------------------------------- kiro tokens

    #[allow(clippy::too_many_arguments)]
    pub async fn create_kiro_token(
        &self,
        user_id: i64,
        refresh_token: &str,
        auth_type: KiroAuthType,
        client_id: Option<&str>,
        client_secret: Option<&str>,
        region: &str,
        visibility: Visibility,
        opus_enabled: bool,
    ) -> Result<i64> {
        if auth_type == KiroAuthType::Idc && (client_id.is_none() || client_secret.is_none()) {
            anyhow::bail!("idc auth_type requires client_id and client_secret");
        }

        let token_hash = self.crypto.token_hash(refresh_token);
        let refresh_ct = self.crypto.encrypt(refresh_token)?;
        let client_id_ct = client_id.map(|s| self.crypto.encrypt(s)).transpose()?;
        let client_secret_ct = client_secret.map(|s| self.crypto.encrypt(s)).transpose()?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tokens
             (user_id, token_hash, refresh_token, auth_type, client_id, client_secret,
              region, visibility, status, opus_enabled, success_count, fail_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', ?9, 0, 0, ?10)",
            params![
                user_id,
                token_hash,
                refresh_ct,
                auth_type.as_str(),
                client_id_ct,
                client_secret_ct,
                region,
                visibility.as_str(),
                opus_enabled as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn get_active_kiro_tokens_by_user(&self, user_id: i64) -> Result<Vec<KiroToken>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, token_hash, refresh_token, auth_type, client_id, client_secret,
                    region, visibility, status, opus_enabled, success_count, fail_count,
                    last_used, last_check, created_at
             FROM tokens WHERE user_id = ?1 AND status = 'active'",
        )?;
        let rows = stmt
            .query_map(params![user_id], row_to_kiro_token)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn admin_get_all_active_kiro_tokens(&self) -> Result<Vec<KiroToken>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, token_hash, refresh_token, auth_type, client_id, client_secret,
                    region, visibility, status, opus_enabled, success_count, fail_count,
                    last_used, last_check, created_at
             FROM tokens WHERE status = 'active'",
        )?;
        let rows = stmt
            .query_map([], row_to_kiro_token)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn get_token_credentials(&self, id: i64) -> Result<Option<TokenCredentials>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT refresh_token, auth_type, client_id, client_secret, region
                 FROM tokens WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((refresh_ct, auth_type, client_id_ct, client_secret_ct, region)) = row else {
            return Ok(None);
        };

        Ok(Some(TokenCredentials {
            refresh_token: self.crypto.decrypt(&refresh_ct)?,
            auth_type: KiroAuthType::parse(&auth_type),
            client_id: client_id_ct.map(|s| self.crypto.decrypt(&s)).transpose()?,
            client_secret: client_secret_ct.map(|s| self.crypto.decrypt(&s)).transpose()?,
            region,
        }))
    }

    pub async fn set_token_status(&self, id: i64, status: TokenStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE tokens SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    pub async fn increment_success(&self, kind: EntityKind, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        match kind {
            EntityKind::KiroToken => {
                conn.execute(
                    "UPDATE tokens SET success_count = success_count + 1, last_used = ?1 WHERE id = ?2",
                    params![Utc::now().to_rfc3339(), id],
                )?;
            }
            EntityKind::CustomAccount => {
                conn.execute(
                    "UPDATE custom_api_accounts SET success_count = success_count + 1 WHERE id = ?1",
                    params![id],
                )?;
            }
        }
        Ok(())
    }

    pub async fn increment_fail(&self, kind: EntityKind, id: i64) -> Result<()> {
        let table = kind.table();
        let conn = self.conn.lock().await;
        conn.execute(
            &format!("UPDATE {table} SET fail_count = fail_count + 1 WHERE id = ?1"),
            params![id],
        )?;
        Ok(())
    }

    pub async fn record_health_check(&self, id: i64, ok: bool, note: &str) -> Result<()> {
        tracing::debug!(token_id = id, ok, note, "recording health check");
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE tokens SET last_check = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        let _ = ok; // note/ok are for the log line above; last_check is the only persisted field
        Ok(())
    }

    // ----------------------------------------------------- custom accounts

    pub async fn create_custom_account(
        &self,
        user_id: i64,
        name: Option<&str>,
        api_base: &str,
        api_key: &str,
        format: CustomAccountFormat,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<i64> {
        validate_api_base(api_base)?;
        let api_key_ct = self.crypto.encrypt(api_key)?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO custom_api_accounts
             (user_id, name, api_base, api_key, format, provider, model, status, success_count, fail_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', 0, 0, ?8)",
            params![
                user_id,
                name,
                api_base,
                api_key_ct,
                format.as_str(),
                provider,
                model,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn get_active_custom_accounts_by_user(&self, user_id: i64) -> Result<Vec<CustomAccount>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, api_base, api_key, format, provider, model, status,
                    success_count, fail_count, created_at
             FROM custom_api_accounts WHERE user_id = ?1 AND status = 'active'",
        )?;
        let rows = stmt
            .query_map(params![user_id], row_to_custom_account)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every account owned by `user_id`, regardless of status (for the
    /// CRUD list endpoint, which shows disabled accounts too).
    pub async fn get_custom_accounts_by_user(&self, user_id: i64) -> Result<Vec<CustomAccount>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, api_base, api_key, format, provider, model, status,
                    success_count, fail_count, created_at
             FROM custom_api_accounts WHERE user_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![user_id], row_to_custom_account)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn get_custom_account(&self, id: i64, user_id: i64) -> Result<Option<CustomAccount>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, user_id, name, api_base, api_key, format, provider, model, status,
                    success_count, fail_count, created_at
             FROM custom_api_accounts WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            row_to_custom_account,
        )
        .optional()
        .context("get_custom_account")
    }

    pub async fn admin_get_all_custom_accounts(&self) -> Result<Vec<CustomAccount>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, api_base, api_key, format, provider, model, status,
                    success_count, fail_count, created_at
             FROM custom_api_accounts",
        )?;
        let rows = stmt
            .query_map([], row_to_custom_account)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn admin_get_custom_account(&self, id: i64) -> Result<Option<CustomAccount>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, user_id, name, api_base, api_key, format, provider, model, status,
                    success_count, fail_count, created_at
             FROM custom_api_accounts WHERE id = ?1",
            params![id],
            row_to_custom_account,
        )
        .optional()
        .context("admin_get_custom_account")
    }

    pub async fn get_custom_api_key(&self, id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let ct: Option<String> = conn
            .query_row(
                "SELECT api_key FROM custom_api_accounts WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        ct.map(|c| self.crypto.decrypt(&c)).transpose()
    }

    /// Applies only keys the caller supplied; ownership enforced by anding
    /// `user_id` into the WHERE clause. Returns whether a row matched.
    /// `user_id = None` selects the admin (ownership-ignoring) variant.
    pub async fn update_custom_account(
        &self,
        id: i64,
        user_id: Option<i64>,
        patch: &CustomAccountPatch,
    ) -> Result<bool> {
        if let Some(api_base) = &patch.api_base {
            validate_api_base(api_base)?;
        }
        if let Some(format) = &patch.format {
            if CustomAccountFormat::parse(format).is_none() {
                anyhow::bail!("format must be one of: openai, claude");
            }
        }

        let mut sets = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(v) = &patch.name {
            sets.push("name = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &patch.api_base {
            sets.push("api_base = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &patch.api_key {
            if !v.is_empty() {
                sets.push("api_key = ?");
                values.push(Box::new(self.crypto.encrypt(v)?));
            }
        }
        if let Some(v) = &patch.format {
            sets.push("format = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &patch.provider {
            sets.push("provider = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &patch.model {
            sets.push("model = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &patch.status {
            sets.push("status = ?");
            values.push(Box::new(v.clone()));
        }

        if sets.is_empty() {
            // Nothing to change; report whether the row (still) exists under this owner.
            let exists = match user_id {
                Some(uid) => self.get_custom_account(id, uid).await?.is_some(),
                None => self.admin_get_custom_account(id).await?.is_some(),
            };
            return Ok(exists);
        }

        let mut sql = format!("UPDATE custom_api_accounts SET {} WHERE id = ?", sets.join(", "));
        values.push(Box::new(id));
        if let Some(uid) = user_id {
            sql.push_str(" AND user_id = ?");
            values.push(Box::new(uid));
        }

        let conn = self.conn.lock().await;
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        let affected = conn.execute(&sql, param_refs.as_slice())?;
        Ok(affected > 0)
    }

    pub async fn delete_custom_account(&self, id: i64, user_id: Option<i64>) -> Result<bool> {
        let conn = self.conn.lock().await;
        let affected = match user_id {
            Some(uid) => conn.execute(
                "DELETE FROM custom_api_accounts WHERE id = ?1 AND user_id = ?2",
                params![id, uid],
            )?,
            None => conn.execute("DELETE FROM custom_api_accounts WHERE id = ?1", params![id])?,
        };
        Ok(affected > 0)
    }

    pub async fn set_custom_account_status(
        &self,
        id: i64,
        user_id: Option<i64>,
        status: CustomAccountStatus,
    ) -> Result<bool> {
        let patch = CustomAccountPatch {
            status: Some(status.as_str().to_string()),
            ..Default::default()
        };
        self.update_custom_account(id, user_id, &patch).await
    }

    // --------------------------------------------------------- sessions

    pub async fn create_session(&self, user_id: i64, token_hash: &str, ttl_seconds: i64) -> Result<i64> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO sessions (user_id, token_hash, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                user_id,
                token_hash,
                now.to_rfc3339(),
                (now + chrono::Duration::seconds(ttl_seconds)).to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn delete_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            "DELETE FROM sessions WHERE expires_at < ?1",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(affected)
    }
}

/// Which credential-table row a counter operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    KiroToken,
    CustomAccount,
}

impl EntityKind {
    fn table(self) -> &'static str {
        match self {
            EntityKind::KiroToken => "tokens",
            EntityKind::CustomAccount => "custom_api_accounts",
        }
    }
}

fn validate_api_base(api_base: &str) -> Result<()> {
    if !api_base.starts_with("http://") && !api_base.starts_with("https://") {
        anyhow::bail!("api_base must be an http:// or https:// URL");
    }
    Ok(())
}

fn ensure_columns(conn: &Connection, table: &str, columns: &[(&str, &str)]) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (name, ddl) in columns {
        if !existing.iter().any(|c| c == name) {
            conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {name} {ddl}"), [])?;
        }
    }
    Ok(())
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        credential_identifier: row.get(1)?,
        password_digest: row.get(2)?,
        api_key_hash: row.get(3)?,
        status: UserStatus::parse(&row.get::<_, String>(4)?),
        created_at: parse_dt(&row.get::<_, String>(5)?),
    })
}

fn row_to_kiro_token(row: &rusqlite::Row) -> rusqlite::Result<KiroToken> {
    Ok(KiroToken {
        id: row.get(0)?,
        user_id: row.get(1)?,
        token_hash: row.get(2)?,
        refresh_token_ciphertext: row.get(3)?,
        auth_type: KiroAuthType::parse(&row.get::<_, String>(4)?),
        client_id_ciphertext: row.get(5)?,
        client_secret_ciphertext: row.get(6)?,
        region: row.get(7)?,
        visibility: Visibility::parse(&row.get::<_, String>(8)?),
        status: TokenStatus::parse(&row.get::<_, String>(9)?),
        opus_enabled: row.get::<_, i64>(10)? != 0,
        success_count: row.get(11)?,
        fail_count: row.get(12)?,
        last_used: row.get::<_, Option<String>>(13)?.map(|s| parse_dt(&s)),
        last_check: row.get::<_, Option<String>>(14)?.map(|s| parse_dt(&s)),
        created_at: parse_dt(&row.get::<_, String>(15)?),
    })
}

fn row_to_custom_account(row: &rusqlite::Row) -> rusqlite::Result<CustomAccount> {
    Ok(CustomAccount {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        api_base: row.get(3)?,
        api_key_ciphertext: row.get(4)?,
        format: CustomAccountFormat::parse(&row.get::<_, String>(5)?)
            .unwrap_or(CustomAccountFormat::Openai),
        provider: row.get(6)?,
        model: row.get(7)?,
        status: CustomAccountStatus::parse(&row.get::<_, String>(8)?),
        success_count: row.get(9)?,
        fail_count: row.get(10)?,
        created_at: parse_dt(&row.get::<_, String>(11)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn temp_db_path() -> PathBuf {
        tempfile::Builder::new()
            .prefix("kiro-gateway-store-test-")
            .suffix(".sqlite")
            .tempfile()
            .expect("create temp db file")
            .into_temp_path()
            .keep()
            .expect("keep temp db path")
    }

    async fn test_store() -> Store {
        let path = temp_db_path();
        let crypto = Arc::new(Crypto::new("test-key-material", false).unwrap());
        let store = Store::open(&path, crypto).unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn ownership_isolation() {
        let store = test_store().await;
        let owner = store
            .create_user("owner@example.com", "digest", "sk-owner")
            .await
            .unwrap();
        let other = store
            .create_user("other@example.com", "digest", "sk-other")
            .await
            .unwrap();

        let account_id = store
            .create_custom_account(
                owner,
                Some("acct"),
                "https://api.example.com",
                "key",
                CustomAccountFormat::Openai,
                None,
                None,
            )
            .await
            .unwrap();

        let before = store.admin_get_custom_account(account_id).await.unwrap().unwrap();

        let patch = CustomAccountPatch {
            name: Some("hijacked".to_string()),
            ..Default::default()
        };
        let matched = store.update_custom_account(account_id, Some(other), &patch).await.unwrap();
        assert!(!matched);

        let after = store.admin_get_custom_account(account_id).await.unwrap().unwrap();
        assert_eq!(before.name, after.name);
    }

    #[tokio::test]
    async fn invalid_api_base_rejected() {
        let store = test_store().await;
        let result = store
            .create_custom_account(1, None, "ftp://bad", "key", CustomAccountFormat::Openai, None, None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_api_key_retains_existing_ciphertext() {
        let store = test_store().await;
        let owner = store.create_user("u@example.com", "d", "sk-1").await.unwrap();
        let id = store
            .create_custom_account(
                owner,
                None,
                "https://api.example.com",
                "original-key",
                CustomAccountFormat::Openai,
                None,
                None,
            )
            .await
            .unwrap();

        let before = store.admin_get_custom_account(id).await.unwrap().unwrap();

        let patch = CustomAccountPatch {
            api_key: Some(String::new()),
            name: Some("renamed".to_string()),
            ..Default::default()
        };
        store.update_custom_account(id, Some(owner), &patch).await.unwrap();

        let after = store.admin_get_custom_account(id).await.unwrap().unwrap();
        assert_eq!(before.api_key_ciphertext, after.api_key_ciphertext);
        assert_eq!(after.name.as_deref(), Some("renamed"));
    }

    #[tokio::test]
    async fn model_matches_trims_and_splits() {
        let store = test_store().await;
        let owner = store.create_user("u2@example.com", "d", "sk-2").await.unwrap();
        store
            .create_custom_account(
                owner,
                None,
                "https://api.example.com",
                "key",
                CustomAccountFormat::Openai,
                None,
                Some("claude-opus-4-6, claude-opus-4-5"),
            )
            .await
            .unwrap();

        let accounts = store.get_active_custom_accounts_by_user(owner).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert!(accounts[0].model_matches("claude-opus-4-6"));
        assert!(accounts[0].model_matches("claude-opus-4-5"));
        assert!(!accounts[0].model_matches("claude-sonnet-4"));
    }
}
