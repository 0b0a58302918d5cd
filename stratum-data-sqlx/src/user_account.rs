//! `UserAccountStorage`: password history and per-store key/value, each
//! kept in a per-user SQLite database as per the persisted-layout section
//! — `password_history` unique on `(user_id, time)`, `store_kv` unique on
//! `(store_id, user_id, key)`.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, PasswordHash,
};
use sqlx::SqlitePool;
use stratum_data::DataError;

pub struct UserAccountStorage {
    pool: SqlitePool,
}

impl UserAccountStorage {
    pub async fn new(pool: SqlitePool) -> Result<Self, DataError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS password_history (
                user_id TEXT NOT NULL,
                time INTEGER NOT NULL,
                hash TEXT NOT NULL,
                UNIQUE(user_id, time)
            )",
        )
        .execute(&pool)
        .await
        .map_err(DataError::database)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS store_kv (
                store_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                UNIQUE(store_id, user_id, key)
            )",
        )
        .execute(&pool)
        .await
        .map_err(DataError::database)?;

        Ok(UserAccountStorage { pool })
    }

    pub fn hash_password(password: &str) -> Result<String, DataError> {
        let salt = SaltString::generate(OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| DataError::Other(e.to_string()))
    }

    /// Constant-time verify against a single stored hash.
    pub fn verify_password(password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    pub async fn record_password(
        &self,
        user_id: &str,
        password: &str,
        now: i64,
    ) -> Result<(), DataError> {
        let hash = Self::hash_password(password)?;
        sqlx::query("INSERT INTO password_history (user_id, time, hash) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(now)
            .bind(hash)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(())
    }

    /// The hash most recently recorded for `user_id` — the current
    /// password. `None` if the user has never had a password set.
    pub async fn current_password_hash(&self, user_id: &str) -> Result<Option<String>, DataError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT hash FROM password_history WHERE user_id = ? ORDER BY time DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(row.map(|(hash,)| hash))
    }

    /// Whether `password` matches any of the user's last `history_length`
    /// passwords. O(historyLength) comparisons, each constant-time.
    pub async fn is_password_reused(
        &self,
        user_id: &str,
        password: &str,
        history_length: u32,
    ) -> Result<bool, DataError> {
        let hashes: Vec<(String,)> = sqlx::query_as(
            "SELECT hash FROM password_history WHERE user_id = ? ORDER BY time DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(history_length)
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::database)?;

        Ok(hashes
            .iter()
            .any(|(hash,)| Self::verify_password(password, hash)))
    }

    pub async fn get_value(
        &self,
        store_id: &str,
        user_id: &str,
        key: &str,
    ) -> Result<Option<String>, DataError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM store_kv WHERE store_id = ? AND user_id = ? AND key = ?")
                .bind(store_id)
                .bind(user_id)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(DataError::database)?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set_value(
        &self,
        store_id: &str,
        user_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), DataError> {
        sqlx::query(
            "INSERT INTO store_kv (store_id, user_id, key, value) VALUES (?, ?, ?, ?)
             ON CONFLICT(store_id, user_id, key) DO UPDATE SET value = excluded.value",
        )
        .bind(store_id)
        .bind(user_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(())
    }

    pub async fn delete_value(&self, store_id: &str, user_id: &str, key: &str) -> Result<(), DataError> {
        sqlx::query("DELETE FROM store_kv WHERE store_id = ? AND user_id = ? AND key = ?")
            .bind(store_id)
            .bind(user_id)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> UserAccountStorage {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        UserAccountStorage::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn hash_then_verify_round_trips() {
        let hash = UserAccountStorage::hash_password("correct horse battery staple").unwrap();
        assert!(UserAccountStorage::verify_password(
            "correct horse battery staple",
            &hash
        ));
        assert!(!UserAccountStorage::verify_password("wrong", &hash));
    }

    #[tokio::test]
    async fn current_password_hash_is_the_most_recent_entry() {
        let storage = storage().await;
        assert!(storage.current_password_hash("user-1").await.unwrap().is_none());

        storage.record_password("user-1", "old-pass", 100).await.unwrap();
        storage.record_password("user-1", "new-pass", 200).await.unwrap();

        let hash = storage.current_password_hash("user-1").await.unwrap().unwrap();
        assert!(UserAccountStorage::verify_password("new-pass", &hash));
        assert!(!UserAccountStorage::verify_password("old-pass", &hash));
    }

    #[tokio::test]
    async fn password_reuse_is_detected_within_history_window() {
        let storage = storage().await;
        storage.record_password("user-1", "first-pass", 100).await.unwrap();
        storage.record_password("user-1", "second-pass", 200).await.unwrap();

        assert!(storage
            .is_password_reused("user-1", "first-pass", 5)
            .await
            .unwrap());
        assert!(!storage
            .is_password_reused("user-1", "never-used", 5)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn password_reuse_respects_history_length_cutoff() {
        let storage = storage().await;
        storage.record_password("user-1", "old-pass", 100).await.unwrap();
        storage.record_password("user-1", "mid-pass", 200).await.unwrap();
        storage.record_password("user-1", "new-pass", 300).await.unwrap();

        // history_length=1 only looks at the most recent entry
        assert!(!storage
            .is_password_reused("user-1", "old-pass", 1)
            .await
            .unwrap());
        assert!(storage
            .is_password_reused("user-1", "new-pass", 1)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn store_kv_set_get_delete_round_trip() {
        let storage = storage().await;
        storage.set_value("s1", "user-1", "k", "v1").await.unwrap();
        assert_eq!(
            storage.get_value("s1", "user-1", "k").await.unwrap(),
            Some("v1".to_string())
        );

        storage.set_value("s1", "user-1", "k", "v2").await.unwrap();
        assert_eq!(
            storage.get_value("s1", "user-1", "k").await.unwrap(),
            Some("v2".to_string())
        );

        storage.delete_value("s1", "user-1", "k").await.unwrap();
        assert_eq!(storage.get_value("s1", "user-1", "k").await.unwrap(), None);
    }
}
