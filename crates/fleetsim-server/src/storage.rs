//! Relational persistence of runs, chargers, message logs and events
//!
//! Append-only from the core's perspective: the simulator writes rows and
//! updates statuses, nothing here is read back into the hot path.

use crate::ServerError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

/// SQLite-backed storage
pub struct Storage {
    pool: SqlitePool,
}

/// A persisted event row
#[derive(Debug, Clone, serde::Serialize)]
pub struct EventRow {
    pub id: i64,
    pub event_type: String,
    pub charger_id: Option<String>,
    pub data: String,
    pub level: String,
    pub created_at: String,
}

impl Storage {
    /// Open the database, creating file and schema when missing
    pub async fn connect(url: &str) -> Result<Self, ServerError> {
        info!(%url, "opening database");
        let options = SqliteConnectOptions::from_str(url)
            .map_err(ServerError::Database)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<(), ServerError> {
        // one statement per call; the sqlite driver prepares each query
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS simulations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'created',
                config TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS chargers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                simulation_id INTEGER,
                identifier TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'offline',
                config TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ocpp_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                charger_identifier TEXT NOT NULL,
                direction TEXT NOT NULL,
                message_type TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                charger_id TEXT,
                data TEXT NOT NULL DEFAULT '{}',
                level TEXT NOT NULL DEFAULT 'info',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn insert_simulation(&self, name: &str, config: &str) -> Result<i64, ServerError> {
        let result = sqlx::query("INSERT INTO simulations (name, config, status) VALUES (?, ?, 'running')")
            .bind(name)
            .bind(config)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update_simulation_status(
        &self,
        id: i64,
        status: &str,
    ) -> Result<(), ServerError> {
        sqlx::query(
            "UPDATE simulations SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(status)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_charger(
        &self,
        simulation_id: Option<i64>,
        identifier: &str,
        status: &str,
        config: &str,
    ) -> Result<i64, ServerError> {
        let result = sqlx::query(
            "INSERT INTO chargers (simulation_id, identifier, status, config) VALUES (?, ?, ?, ?)",
        )
        .bind(simulation_id)
        .bind(identifier)
        .bind(status)
        .bind(config)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update_charger_status(
        &self,
        identifier: &str,
        status: &str,
    ) -> Result<(), ServerError> {
        sqlx::query(
            "UPDATE chargers SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE identifier = ?",
        )
        .bind(status)
        .bind(identifier)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_ocpp_message(
        &self,
        charger_identifier: &str,
        direction: &str,
        message_type: &str,
        payload: &str,
    ) -> Result<(), ServerError> {
        sqlx::query(
            "INSERT INTO ocpp_messages (charger_identifier, direction, message_type, payload) VALUES (?, ?, ?, ?)",
        )
        .bind(charger_identifier)
        .bind(direction)
        .bind(message_type)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_event(
        &self,
        event_type: &str,
        charger_id: Option<&str>,
        data: &str,
        level: &str,
    ) -> Result<(), ServerError> {
        sqlx::query(
            "INSERT INTO events (event_type, charger_id, data, level) VALUES (?, ?, ?, ?)",
        )
        .bind(event_type)
        .bind(charger_id)
        .bind(data)
        .bind(level)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_events(&self, limit: i64) -> Result<Vec<EventRow>, ServerError> {
        let rows = sqlx::query(
            "SELECT id, event_type, charger_id, data, level, created_at
             FROM events ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| EventRow {
                id: row.get("id"),
                event_type: row.get("event_type"),
                charger_id: row.get("charger_id"),
                data: row.get("data"),
                level: row.get("level"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    pub async fn health_check(&self) -> Result<(), ServerError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_storage() -> Storage {
        Storage::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_schema_and_health() {
        let storage = memory_storage().await;
        storage.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_simulation_lifecycle() {
        let storage = memory_storage().await;

        let id = storage
            .insert_simulation("boot-storm", r#"{"duration":60}"#)
            .await
            .unwrap();
        assert!(id > 0);
        storage.update_simulation_status(id, "completed").await.unwrap();
    }

    #[tokio::test]
    async fn test_charger_and_message_rows() {
        let storage = memory_storage().await;

        let id = storage
            .insert_charger(None, "CP001", "offline", "{}")
            .await
            .unwrap();
        assert!(id > 0);
        storage.update_charger_status("CP001", "connected").await.unwrap();

        storage
            .insert_ocpp_message("CP001", "outgoing", "BootNotification", "{}")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_event_tail_is_newest_first() {
        let storage = memory_storage().await;

        for i in 0..5 {
            storage
                .insert_event("tick", Some("CP001"), &format!(r#"{{"seq":{i}}}"#), "info")
                .await
                .unwrap();
        }

        let tail = storage.recent_events(3).await.unwrap();
        assert_eq!(tail.len(), 3);
        assert!(tail[0].id > tail[1].id);
        assert_eq!(tail[0].event_type, "tick");
    }
}
