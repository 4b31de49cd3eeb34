//! The command line interface for the scenario tools.
use crate::cache::ReferenceCache;
use crate::cache::blob::CommonDataBlob;
use crate::cache::object_store::LocalObjectStore;
use crate::cache::snapshot::SnapshotDb;
use crate::consortium::fanout::{HttpMemberSource, MemberSource, StoreMemberSource};
use crate::id::{PackageID, ScenarioID};
use crate::input::read_toml;
use crate::log;
use crate::output::{create_output_directory, get_output_dir, write_scenario};
use crate::scenario::load_scenario;
use crate::settings::Settings;
use crate::store::Store;
use ::log::info;
use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod consortium;
pub mod import;
pub mod settings;
pub mod snapshot;
use consortium::ConsortiumSubcommands;
use import::ImportSubcommands;
use settings::SettingsSubcommands;
use snapshot::{BlobSubcommands, SnapshotSubcommands};

/// The command line interface for the scenario tools.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
    /// Flag to provide the CLI docs as markdown
    #[arg(long, hide = true)]
    markdown_help: bool,
}

/// Options for the scenario command
#[derive(Args)]
pub struct ScenarioOpts {
    /// The saved scenario to use (defaults to the package's latest)
    #[arg(long)]
    pub scenario_id: Option<String>,
    /// TOML file of assumption overrides applied on top of the saved scenario
    #[arg(long)]
    pub assumptions: Option<PathBuf>,
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Evaluate a package under its saved scenario and write the results.
    Scenario {
        /// The package to evaluate.
        package_id: String,
        /// Other scenario options
        #[command(flatten)]
        opts: ScenarioOpts,
    },
    /// Recompute or queue consortium scenarios.
    Consortium {
        /// The available subcommands for consortia.
        #[command(subcommand)]
        subcommand: ConsortiumSubcommands,
    },
    /// Run the recompute queue worker.
    Worker {
        /// Process the pending items once and exit
        #[arg(long)]
        once: bool,
    },
    /// Load packages and reference tables into the primary store.
    Import {
        /// The available subcommands for importing data.
        #[command(subcommand)]
        subcommand: ImportSubcommands,
    },
    /// Manage the local reference snapshot database.
    Snapshot {
        /// The available subcommands for the snapshot.
        #[command(subcommand)]
        subcommand: SnapshotSubcommands,
    },
    /// Manage the common data blob.
    Blob {
        /// The available subcommands for the blob.
        #[command(subcommand)]
        subcommand: BlobSubcommands,
    },
    /// Manage settings file.
    Settings {
        /// The subcommands for managing the settings file
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        if let Self::Settings { subcommand } = self {
            // No logging or runtime needed to manage the settings file
            return subcommand.execute();
        }

        let settings = Settings::load().context("Failed to load settings.")?;
        log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

        let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime.")?;
        runtime.block_on(self.execute_async(&settings))
    }

    async fn execute_async(self, settings: &Settings) -> Result<()> {
        match self {
            Self::Scenario { package_id, opts } => {
                handle_scenario_command(&package_id, &opts, settings).await
            }
            Self::Consortium { subcommand } => subcommand.execute(settings).await,
            Self::Worker { once } => handle_worker_command(once, settings).await,
            Self::Import { subcommand } => subcommand.execute(settings).await,
            Self::Snapshot { subcommand } => subcommand.execute(settings).await,
            Self::Blob { subcommand } => subcommand.execute(settings).await,
            Self::Settings { .. } => unreachable!("handled before the runtime starts"),
        }
    }
}

/// Parse CLI arguments and run the requested command
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Invoked as: `$ journal-scenarios --markdown-help`
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(());
    }

    let Some(command) = cli.command else {
        let help_str = Cli::command().render_long_help().to_string();
        println!("{help_str}");
        return Ok(());
    };

    command.execute()
}

/// Connections shared by the commands which touch the store
pub struct Services {
    /// The primary store
    pub store: Store,
    /// Reference data through every cache tier
    pub cache: Arc<ReferenceCache>,
    /// Where archives and blobs are kept
    pub object_store: Arc<LocalObjectStore>,
}

impl Services {
    /// Open the store and assemble the cache tiers described by `settings`
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let store = Store::open(&settings.database_path).await?;
        let object_store = Arc::new(LocalObjectStore::new(&settings.object_store_dir));
        let cache = ReferenceCache::new(store.clone())
            .with_snapshot(SnapshotDb::new(&settings.snapshot_path))
            .with_blob(CommonDataBlob::new(object_store.clone()));

        Ok(Self {
            store,
            cache: Arc::new(cache),
            object_store,
        })
    }

    /// Where consortium members' scenarios are fetched from.
    ///
    /// Uses the configured HTTP endpoint if there is one, otherwise evaluates members locally.
    pub fn member_source(&self, settings: &Settings) -> Arc<dyn MemberSource> {
        match &settings.member_endpoint {
            Some(endpoint) => Arc::new(HttpMemberSource::new(endpoint)),
            None => Arc::new(StoreMemberSource::new(
                self.store.clone(),
                self.cache.clone(),
            )),
        }
    }
}

/// Handle the `scenario` command.
pub async fn handle_scenario_command(
    package_id: &str,
    opts: &ScenarioOpts,
    settings: &Settings,
) -> Result<()> {
    let services = Services::connect(settings).await?;
    let package_id = PackageID::from(package_id);
    let scenario_id = opts.scenario_id.as_deref().map(ScenarioID::from);
    let overrides: Option<serde_json::Value> = opts
        .assumptions
        .as_deref()
        .map(read_toml)
        .transpose()
        .context("Failed to read assumption overrides.")?;

    let scenario = load_scenario(
        &services.store,
        &services.cache,
        &package_id,
        scenario_id.as_ref(),
        overrides.as_ref(),
    )
    .await?;

    let pathbuf: PathBuf;
    let output_path: &Path = if let Some(p) = opts.output_dir.as_deref() {
        p
    } else {
        pathbuf = get_output_dir(package_id.as_str())?;
        &pathbuf
    };
    create_output_directory(output_path)?;
    write_scenario(output_path, &scenario)?;

    let summary = scenario.summary();
    info!(
        "{} journals, {} subscribed, total cost {:.2} {}",
        summary.num_journals,
        summary.num_subscribed,
        summary.cost_total.value(),
        scenario.package.currency
    );
    info!("Results written to {}", output_path.display());

    Ok(())
}

/// Handle the `worker` command.
pub async fn handle_worker_command(once: bool, settings: &Settings) -> Result<()> {
    use crate::consortium::queue::{LoggingNotifier, Worker};

    let services = Services::connect(settings).await?;
    let worker = Worker::new(
        services.store.clone(),
        services.member_source(settings),
        Arc::new(LoggingNotifier),
        settings,
    );

    if once {
        let completed = worker.run_once().await?;
        info!("Completed {completed} queued recomputes");
    } else {
        worker.run_forever().await;
    }

    Ok(())
}
