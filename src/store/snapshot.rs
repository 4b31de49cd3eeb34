//! Append-only scenario and consortium snapshots.
//!
//! Each save inserts a new row; nothing is ever updated in place. The current state of a
//! scenario is its most recent row by timestamp, with insertion order breaking ties.
use super::Store;
use crate::consortium::ConsortiumSnapshot;
use crate::id::ScenarioID;
use crate::scenario::ScenarioSnapshot;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;

const SCENARIO_TABLE: &str = "scenario_snapshots";
const CONSORTIUM_TABLE: &str = "consortium_snapshots";

/// Format a timestamp so that string order matches time order
fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp: {s}"))?
        .with_timezone(&Utc))
}

impl Store {
    async fn append_snapshot<T: Serialize>(
        &self,
        table: &str,
        scenario_id: &ScenarioID,
        snapshot: &T,
    ) -> Result<DateTime<Utc>> {
        let updated = Utc::now();
        sqlx::query(&format!(
            "INSERT INTO {table} (scenario_id, updated, snapshot) VALUES (?, ?, ?)"
        ))
        .bind(scenario_id.as_str())
        .bind(format_timestamp(updated))
        .bind(serde_json::to_string(snapshot)?)
        .execute(self.pool())
        .await?;

        Ok(updated)
    }

    async fn snapshot_history<T: DeserializeOwned>(
        &self,
        table: &str,
        scenario_id: &ScenarioID,
        limit: Option<u32>,
    ) -> Result<Vec<(DateTime<Utc>, T)>> {
        let rows = sqlx::query(&format!(
            "SELECT updated, snapshot FROM {table} WHERE scenario_id = ? \
            ORDER BY updated DESC, seq DESC LIMIT ?"
        ))
        .bind(scenario_id.as_str())
        .bind(limit.map_or(-1, i64::from))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                let updated = parse_timestamp(&row.try_get::<String, _>("updated")?)?;
                let snapshot = serde_json::from_str(&row.try_get::<String, _>("snapshot")?)
                    .with_context(|| format!("Invalid snapshot for scenario {scenario_id}"))?;
                Ok((updated, snapshot))
            })
            .collect()
    }

    /// Save a new version of a scenario, returning its timestamp
    pub async fn save_scenario_snapshot(&self, snapshot: &ScenarioSnapshot) -> Result<DateTime<Utc>> {
        self.append_snapshot(SCENARIO_TABLE, &snapshot.id, snapshot)
            .await
    }

    /// The current version of a scenario, if it has ever been saved
    pub async fn latest_scenario_snapshot(
        &self,
        scenario_id: &ScenarioID,
    ) -> Result<Option<ScenarioSnapshot>> {
        let mut history = self
            .snapshot_history(SCENARIO_TABLE, scenario_id, Some(1))
            .await?;

        Ok(history.pop().map(|(_, snapshot)| snapshot))
    }

    /// Every saved version of a scenario, newest first
    pub async fn list_scenario_snapshots(
        &self,
        scenario_id: &ScenarioID,
    ) -> Result<Vec<(DateTime<Utc>, ScenarioSnapshot)>> {
        self.snapshot_history(SCENARIO_TABLE, scenario_id, None)
            .await
    }

    /// Save a new version of a consortium's member list, returning its timestamp
    pub async fn save_consortium_snapshot(
        &self,
        snapshot: &ConsortiumSnapshot,
    ) -> Result<DateTime<Utc>> {
        self.append_snapshot(CONSORTIUM_TABLE, &snapshot.id, snapshot)
            .await
    }

    /// The current version of a consortium's member list
    pub async fn latest_consortium_snapshot(
        &self,
        scenario_id: &ScenarioID,
    ) -> Result<Option<ConsortiumSnapshot>> {
        let mut history = self
            .snapshot_history(CONSORTIUM_TABLE, scenario_id, Some(1))
            .await?;

        Ok(history.pop().map(|(_, snapshot)| snapshot))
    }
}
