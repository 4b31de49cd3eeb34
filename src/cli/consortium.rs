//! CLI commands for recomputing consortium scenarios.
use super::Services;
use crate::consortium::recompute_consortium;
use crate::id::ScenarioID;
use crate::output::{create_output_directory, get_output_dir, write_consortium};
use crate::settings::Settings;
use ::log::{info, warn};
use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

/// The available subcommands for consortia
#[derive(Subcommand)]
pub enum ConsortiumSubcommands {
    /// Recompute a consortium scenario now and write the blended results.
    Recompute {
        /// The consortium scenario to recompute.
        scenario_id: String,
        /// Directory for output files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Queue a consortium scenario for the background worker.
    Enqueue {
        /// The consortium scenario to recompute.
        scenario_id: String,
        /// Who to notify once the recompute finishes
        #[arg(long)]
        email: Option<String>,
    },
}

impl ConsortiumSubcommands {
    /// Execute the supplied consortium subcommand
    pub async fn execute(self, settings: &Settings) -> Result<()> {
        let services = Services::connect(settings).await?;
        match self {
            Self::Recompute {
                scenario_id,
                output_dir,
            } => handle_recompute_command(&services, settings, &scenario_id, output_dir).await,
            Self::Enqueue { scenario_id, email } => {
                let scenario_id = ScenarioID::from(scenario_id.as_str());
                let id = services
                    .store
                    .enqueue_recompute(&scenario_id, email.as_deref())
                    .await?;
                info!("Queued recompute {id} for consortium {scenario_id}");
                Ok(())
            }
        }
    }
}

/// Handle the `consortium recompute` command
async fn handle_recompute_command(
    services: &Services,
    settings: &Settings,
    scenario_id: &str,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let scenario_id = ScenarioID::from(scenario_id);
    let source = services.member_source(settings);
    let consortium = recompute_consortium(
        &services.store,
        source.as_ref(),
        &scenario_id,
        settings.fanout_workers,
        settings.member_fetch_timeout(),
    )
    .await?;
    services
        .store
        .save_consortium_snapshot(&consortium.snapshot)
        .await?;

    for failure in consortium.failures() {
        warn!(
            "Member {} left out of consortium {scenario_id}: {}",
            failure.package_id, failure.message
        );
    }

    let output_dir = match output_dir {
        Some(dir) => dir,
        None => get_output_dir(scenario_id.as_str())?,
    };
    create_output_directory(&output_dir)?;
    write_consortium(&output_dir, &consortium)?;
    info!("Results written to {}", output_dir.display());

    Ok(())
}
