//! CLI commands for loading packages and reference tables into the primary store.
use super::Services;
use crate::input::read_json;
use crate::package::{Package, PackageData};
use crate::reference::ReferenceData;
use crate::settings::Settings;
use ::log::info;
use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Subcommands for importing data
#[derive(Subcommand)]
pub enum ImportSubcommands {
    /// Load reference tables from a JSON file, replacing existing rows for the same journals.
    Reference {
        /// Path to the JSON file.
        file: PathBuf,
    },
    /// Load a package and its usage, prices and holdings from a JSON file.
    Package {
        /// Path to the JSON file.
        file: PathBuf,
    },
}

/// The contents of a package import file
#[derive(Debug, Deserialize)]
struct PackageFile {
    package: Package,
    #[serde(default)]
    data: PackageData,
}

impl ImportSubcommands {
    /// Execute the supplied import subcommand
    pub async fn execute(self, settings: &Settings) -> Result<()> {
        let services = Services::connect(settings).await?;

        match self {
            Self::Reference { file } => {
                let data: ReferenceData = read_file(&file)?;
                services.store.insert_reference_data(&data).await?;
                info!(
                    "Imported reference data for {} journals: {:?}",
                    data.issns().len(),
                    data.row_counts()
                );
            }
            Self::Package { file } => {
                let PackageFile { package, data } = read_file(&file)?;
                services.store.insert_package(&package).await?;
                services.store.insert_package_data(&package.id, &data).await?;
                info!(
                    "Imported package {} with {} journals",
                    package.id,
                    data.journal_issns().len()
                );
            }
        }

        Ok(())
    }
}

fn read_file<T: serde::de::DeserializeOwned>(file: &Path) -> Result<T> {
    read_json(file).with_context(|| format!("Failed to import {}", file.display()))
}
