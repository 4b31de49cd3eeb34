//! Tier 2: a locally materialised SQLite copy of the reference tables.
//!
//! The snapshot is only trusted if its row counts match both the counts recorded when it was
//! built and the primary store's current counts. Anything else triggers a full rebuild: there is
//! no incremental update.
use super::object_store::ObjectStore;
use crate::reference::{IdentifierSet, ReferenceData, ReferenceRowCounts};
use crate::store::Store;
use crate::store::reference::{count_reference_rows, insert_reference_data, load_reference_data};
use crate::store::schema::create_reference_tables;
use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Object key for the compressed snapshot archive
pub const SNAPSHOT_ARCHIVE_KEY: &str = "reference_snapshot.sqlite.lz4";

const CREATE_META_TABLE: &str = r"CREATE TABLE IF NOT EXISTS snapshot_meta (
    table_name TEXT PRIMARY KEY,
    row_count INTEGER NOT NULL
)";

/// Open a single-file database (no WAL) so the file can be copied as-is
async fn open_pool(path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Delete);

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("Could not open snapshot database {}", path.display()))
}

fn counts_as_rows(counts: &ReferenceRowCounts) -> [(&'static str, u64); 6] {
    [
        ("journal_metadata", counts.metadata),
        ("journal_embargo", counts.embargo),
        ("journal_downloads", counts.downloads),
        ("journal_oa_status", counts.oa_status),
        ("journal_social_networks", counts.social_networks),
        ("journal_paper_counts", counts.paper_counts),
    ]
}

async fn write_meta(pool: &SqlitePool, counts: &ReferenceRowCounts) -> Result<()> {
    sqlx::query(CREATE_META_TABLE).execute(pool).await?;
    for (table, count) in counts_as_rows(counts) {
        sqlx::query("INSERT OR REPLACE INTO snapshot_meta (table_name, row_count) VALUES (?, ?)")
            .bind(table)
            .bind(i64::try_from(count)?)
            .execute(pool)
            .await?;
    }

    Ok(())
}

async fn read_meta(pool: &SqlitePool) -> Result<ReferenceRowCounts> {
    let rows = sqlx::query("SELECT table_name, row_count FROM snapshot_meta")
        .fetch_all(pool)
        .await?;

    let mut counts = ReferenceRowCounts::default();
    for row in rows {
        let count = u64::try_from(row.try_get::<i64, _>("row_count")?)?;
        let slot = match row.try_get::<String, _>("table_name")?.as_str() {
            "journal_metadata" => &mut counts.metadata,
            "journal_embargo" => &mut counts.embargo,
            "journal_downloads" => &mut counts.downloads,
            "journal_oa_status" => &mut counts.oa_status,
            "journal_social_networks" => &mut counts.social_networks,
            "journal_paper_counts" => &mut counts.paper_counts,
            _ => continue,
        };
        *slot = count;
    }

    Ok(counts)
}

/// The local snapshot database
#[derive(Debug)]
pub struct SnapshotDb {
    path: PathBuf,
    /// An open pool, present once the snapshot has been verified in this process
    pool: Mutex<Option<SqlitePool>>,
}

impl SnapshotDb {
    /// A snapshot stored at `path`. Nothing is opened until first use.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            pool: Mutex::new(None),
        }
    }

    /// Where the snapshot lives on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("rebuild")
    }

    /// Check whether the on-disk snapshot is complete relative to `expected`
    async fn check_complete(&self, expected: &ReferenceRowCounts) -> Result<Option<SqlitePool>> {
        if !self.path.is_file() {
            info!("No reference snapshot at {}", self.path.display());
            return Ok(None);
        }

        let pool = open_pool(&self.path, false).await?;
        let recorded = read_meta(&pool).await?;
        let actual = count_reference_rows(&pool).await?;
        if recorded == actual && actual == *expected {
            Ok(Some(pool))
        } else {
            warn!(
                "Reference snapshot is incomplete (recorded {recorded:?}, found {actual:?}, \
                expected {expected:?})"
            );
            pool.close().await;
            Ok(None)
        }
    }

    /// Make sure a complete snapshot is available, rebuilding it from `primary` if not
    pub async fn ensure_ready(&self, primary: &Store) -> Result<()> {
        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            return Ok(());
        }

        let expected = primary.reference_row_counts().await?;
        let verified = match self.check_complete(&expected).await {
            Ok(verified) => verified,
            Err(err) => {
                warn!("Could not read reference snapshot: {err:#}");
                None
            }
        };

        *pool = match verified {
            Some(verified) => Some(verified),
            None => Some(self.rebuild_locked(primary).await?),
        };

        Ok(())
    }

    /// Rebuild the snapshot from scratch from the primary store
    pub async fn rebuild(&self, primary: &Store) -> Result<()> {
        let mut pool = self.pool.lock().await;
        if let Some(old) = pool.take() {
            old.close().await;
        }
        *pool = Some(self.rebuild_locked(primary).await?);

        Ok(())
    }

    async fn rebuild_locked(&self, primary: &Store) -> Result<SqlitePool> {
        info!("Rebuilding reference snapshot at {}", self.path.display());
        let tmp_path = self.tmp_path();
        if tmp_path.exists() {
            tokio::fs::remove_file(&tmp_path).await?;
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let data = primary.reference_data(&IdentifierSet::All).await?;
        let tmp_pool = open_pool(&tmp_path, true).await?;
        create_reference_tables(&tmp_pool).await?;
        insert_reference_data(&tmp_pool, &data).await?;
        write_meta(&tmp_pool, &data.row_counts()).await?;
        tmp_pool.close().await;

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .context("Could not replace reference snapshot")?;
        info!("Reference snapshot rebuilt: {:?}", data.row_counts());

        open_pool(&self.path, false).await
    }

    /// Load reference data from the snapshot. Call [`SnapshotDb::ensure_ready`] first.
    pub async fn load(&self, ids: &IdentifierSet) -> Result<ReferenceData> {
        let pool = self
            .pool
            .lock()
            .await
            .clone()
            .context("Reference snapshot has not been verified")?;

        load_reference_data(&pool, ids).await
    }

    /// Compress the snapshot file and upload it to `object_store`
    pub async fn pack(&self, object_store: &dyn ObjectStore) -> Result<()> {
        let _guard = self.pool.lock().await;
        let data = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Could not read {}", self.path.display()))?;
        let compressed = lz4_flex::compress_prepend_size(&data);
        info!(
            "Packed reference snapshot: {} bytes compressed to {}",
            data.len(),
            compressed.len()
        );

        object_store.put(SNAPSHOT_ARCHIVE_KEY, compressed).await
    }

    /// Replace the local snapshot with the archive from `object_store`.
    ///
    /// The restored file is verified on next use like any other snapshot.
    pub async fn restore(&self, object_store: &dyn ObjectStore) -> Result<()> {
        let compressed = object_store
            .get(SNAPSHOT_ARCHIVE_KEY)
            .await?
            .context("No reference snapshot archive in object storage")?;
        let data = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|err| anyhow!("Corrupt reference snapshot archive: {err}"))?;

        let mut pool = self.pool.lock().await;
        if let Some(old) = pool.take() {
            old.close().await;
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.tmp_path();
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        info!("Restored reference snapshot ({} bytes)", data.len());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::object_store::LocalObjectStore;
    use crate::fixture::{issn, reference_data};
    use rstest::rstest;
    use tempfile::tempdir;

    async fn primary_with(data: &ReferenceData) -> Store {
        let store = Store::in_memory().await.unwrap();
        store.insert_reference_data(data).await.unwrap();
        store
    }

    #[rstest]
    #[tokio::test]
    async fn test_ensure_ready_builds_missing(reference_data: ReferenceData) {
        let dir = tempdir().unwrap();
        let snapshot = SnapshotDb::new(&dir.path().join("snapshot.sqlite"));
        let primary = primary_with(&reference_data).await;

        snapshot.ensure_ready(&primary).await.unwrap();
        assert!(snapshot.path().is_file());
        assert_eq!(snapshot.load(&IdentifierSet::All).await.unwrap(), reference_data);
    }

    #[rstest]
    #[tokio::test]
    async fn test_incomplete_snapshot_rebuilt(reference_data: ReferenceData) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.sqlite");

        // Build from a primary store missing one journal
        let partial = reference_data.restrict_to(&[issn("0000-0001")].into_iter().collect());
        SnapshotDb::new(&path)
            .ensure_ready(&primary_with(&partial).await)
            .await
            .unwrap();

        let snapshot = SnapshotDb::new(&path);
        snapshot
            .ensure_ready(&primary_with(&reference_data).await)
            .await
            .unwrap();
        assert_eq!(snapshot.load(&IdentifierSet::All).await.unwrap(), reference_data);
    }

    #[tokio::test]
    async fn test_load_before_ready_fails() {
        let dir = tempdir().unwrap();
        let snapshot = SnapshotDb::new(&dir.path().join("snapshot.sqlite"));
        assert!(snapshot.load(&IdentifierSet::All).await.is_err());
    }

    #[rstest]
    #[tokio::test]
    async fn test_pack_restore(reference_data: ReferenceData) {
        let dir = tempdir().unwrap();
        let objects = LocalObjectStore::new(&dir.path().join("objects"));
        let primary = primary_with(&reference_data).await;

        let original = SnapshotDb::new(&dir.path().join("a.sqlite"));
        original.ensure_ready(&primary).await.unwrap();
        original.pack(&objects).await.unwrap();

        let restored = SnapshotDb::new(&dir.path().join("b.sqlite"));
        restored.restore(&objects).await.unwrap();
        restored.ensure_ready(&primary).await.unwrap();
        assert_eq!(
            restored.load(&IdentifierSet::All).await.unwrap(),
            reference_data
        );
    }

    #[tokio::test]
    async fn test_restore_without_archive() {
        let dir = tempdir().unwrap();
        let objects = LocalObjectStore::new(dir.path());
        let snapshot = SnapshotDb::new(&dir.path().join("snapshot.sqlite"));
        assert!(snapshot.restore(&objects).await.is_err());
    }
}
