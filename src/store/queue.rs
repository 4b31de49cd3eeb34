//! The durable consortium recompute queue.
//!
//! Work items live only in the `recompute_queue` table, so a worker that crashes mid-item leaves
//! it pending and it is picked up again on restart.
use super::Store;
use crate::id::ScenarioID;
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use sqlx::Row;

/// A pending request to recompute a consortium scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Row identifier
    pub id: i64,
    /// The consortium scenario to recompute
    pub scenario_id: ScenarioID,
    /// Who to notify when the recompute is done
    pub email: Option<String>,
    /// When the item was queued
    pub created: String,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Store {
    /// Queue a recompute, returning the item's ID
    pub async fn enqueue_recompute(&self, scenario_id: &ScenarioID, email: Option<&str>) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO recompute_queue (scenario_id, email, created) VALUES (?, ?, ?)",
        )
        .bind(scenario_id.as_str())
        .bind(email)
        .bind(now())
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Every item without a completion timestamp, oldest first
    pub async fn pending_recomputes(&self) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query(
            "SELECT id, scenario_id, email, created FROM recompute_queue \
            WHERE completed IS NULL ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(QueueItem {
                    id: row.try_get("id")?,
                    scenario_id: row.try_get::<String, _>("scenario_id")?.into(),
                    email: row.try_get("email")?,
                    created: row.try_get("created")?,
                })
            })
            .collect()
    }

    /// Record that an item has been processed
    pub async fn mark_recompute_complete(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE recompute_queue SET completed = ? WHERE id = ?")
            .bind(now())
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(())
    }
}
