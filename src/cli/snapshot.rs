//! CLI commands for the local snapshot database and the common data blob.
use super::Services;
use crate::cache::blob::publish;
use crate::cache::snapshot::SnapshotDb;
use crate::reference::IdentifierSet;
use crate::settings::Settings;
use ::log::info;
use anyhow::Result;
use clap::Subcommand;

/// Subcommands for the local snapshot database
#[derive(Subcommand)]
pub enum SnapshotSubcommands {
    /// Copy the reference tables from the primary store into a fresh snapshot.
    Rebuild,
    /// Compress the snapshot and upload it to the object store.
    Pack,
    /// Download and unpack the snapshot from the object store.
    Restore,
}

impl SnapshotSubcommands {
    /// Execute the supplied snapshot subcommand
    pub async fn execute(self, settings: &Settings) -> Result<()> {
        let services = Services::connect(settings).await?;
        let snapshot = SnapshotDb::new(&settings.snapshot_path);

        match self {
            Self::Rebuild => snapshot.rebuild(&services.store).await?,
            Self::Pack => {
                snapshot.ensure_ready(&services.store).await?;
                snapshot.pack(&*services.object_store).await?;
            }
            Self::Restore => {
                snapshot.restore(&*services.object_store).await?;
                // A restored archive may be stale, so check it against the primary store
                snapshot.ensure_ready(&services.store).await?;
            }
        }
        info!("Snapshot at {} is up to date", snapshot.path().display());

        Ok(())
    }
}

/// Subcommands for the common data blob
#[derive(Subcommand)]
pub enum BlobSubcommands {
    /// Serialise the full reference dataset and upload it to the object store.
    Publish,
}

impl BlobSubcommands {
    /// Execute the supplied blob subcommand
    pub async fn execute(self, settings: &Settings) -> Result<()> {
        let services = Services::connect(settings).await?;

        match self {
            Self::Publish => {
                let data = services.store.reference_data(&IdentifierSet::All).await?;
                publish(&*services.object_store, &data).await?;
                info!("Published reference data for {} journals", data.issns().len());
            }
        }

        Ok(())
    }
}
