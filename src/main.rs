use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use psc_sync::config::{self, SyncConfig};
use psc_sync::database_ops::catalog::{
    CatalogFetch, CatalogQuery, CatalogRepository, PgCatalogRepository,
};
use psc_sync::database_ops::db::Db;
use psc_sync::database_ops::psc::PscProvider;
use psc_sync::notify::{Notifier, NoopNotifier, SlackNotifier};
use psc_sync::orchestrator::{unique_catalog_family_ids, SyncOrchestrator};
use psc_sync::util::env as env_util;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "psc-sync", version, about = "Push APSViz run catalogs to the PSC web service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    // Allow `psc-sync --run-id X` without the explicit `run` subcommand.
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync one run's catalogs to PSC (default when no command supplied)
    Run(RunArgs),
    /// Print the unique catalog family IDs the procedure returns
    Families(FamiliesArgs),
    /// Validate configuration and log a redacted snapshot
    Preflight,
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// APSViz supervisor run ID
    #[arg(short = 'r', long = "run-id", alias = "run_id")]
    run_id: Option<String>,
    /// Physical location of the run; falls back to PHYSICAL_LOCATION, then the PSC site ID
    #[arg(short = 'l', long = "physical-location", alias = "physical_location")]
    physical_location: Option<String>,
}

#[derive(Debug, Args)]
struct FamiliesArgs {
    #[arg(short = 'r', long = "run-id")]
    run_id: Option<String>,
    #[arg(long)]
    project_code: Option<String>,
    #[arg(long)]
    event_type: Option<String>,
    #[arg(long)]
    limit: Option<u32>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_util::init_env();
    if let Err(e) = psc_sync::tracing::init_tracing("info,sqlx=warn") {
        eprintln!("{e:#}");
    }

    let cli = Cli::parse();
    let res = match cli.command {
        Some(Command::Run(args)) => run_sync(args).await,
        Some(Command::Families(args)) => families(args).await,
        Some(Command::Preflight) => preflight(),
        None => run_sync(cli.run).await,
    };

    match res {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = ?e, "psc-sync aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run_sync(args: RunArgs) -> Result<bool> {
    let run_id = args.run_id.context("a run ID is required (--run-id)")?;

    // Gate before loading the PSC settings: other sites do not carry them.
    let site_id = config::site_id_from_env();
    let Some(physical_location) = served_location(args.physical_location, &site_id) else {
        info!(%run_id, %site_id, "location not served by PSC; nothing to sync");
        return Ok(true);
    };

    let cfg = SyncConfig::from_env().context("loading PSC sync configuration")?;
    let notifier: Box<dyn Notifier> = if cfg.slack.is_configured() {
        Box::new(SlackNotifier::new(cfg.system.clone(), cfg.slack.clone())?)
    } else {
        Box::new(NoopNotifier)
    };

    // Lazy pool: an unreachable database fails inside `run`, with the run ID.
    let db = Db::connect_from_env()
        .with_context(|| format!("configuring the apsviz database for run id {run_id}"))?;
    let provider = PscProvider::from_config(&cfg)?;
    info!(
        %run_id,
        endpoint = %provider.url(),
        accepted_projects = cfg.accepted_projects.len(),
        system = %cfg.system,
        "starting PSC sync"
    );
    let orchestrator = SyncOrchestrator::new(
        cfg,
        Box::new(PgCatalogRepository::new(db)),
        Box::new(provider),
    )
    .with_notifier(notifier);

    let ok = orchestrator.run(&run_id, &physical_location).await;
    if ok {
        info!(%run_id, "PSC sync finished");
    } else {
        warn!(%run_id, "PSC sync failed");
    }
    Ok(ok)
}

/// Resolve the run's location (flag, then `PHYSICAL_LOCATION`, then the site
/// itself) and keep it only when the site serves it.
fn served_location(requested: Option<String>, site_id: &str) -> Option<String> {
    let location = requested
        .or_else(|| env_util::env_opt("PHYSICAL_LOCATION"))
        .unwrap_or_else(|| site_id.to_string());
    config::location_applies(site_id, &location).then_some(location)
}

async fn families(args: FamiliesArgs) -> Result<bool> {
    let mut query = CatalogQuery {
        run_id: args.run_id,
        ..Default::default()
    };
    if let Some(code) = args.project_code {
        query = query.project_code(code);
    }
    if let Some(event_type) = args.event_type {
        query = query.event_type(event_type);
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }

    let db = Db::connect_from_env().context("configuring the apsviz database")?;
    let repo = PgCatalogRepository::new(db);
    match repo.fetch(&query).await? {
        CatalogFetch::StoreError { message } => {
            warn!(%message, "catalog procedure reported an error");
            Ok(false)
        }
        CatalogFetch::Records(result) => {
            for family in unique_catalog_family_ids(&result) {
                println!("{family}");
            }
            info!(
                catalogs = result.catalogs().len(),
                past_runs = result.past_runs().len(),
                "catalog families listed"
            );
            Ok(true)
        }
    }
}

fn preflight() -> Result<bool> {
    env_util::preflight_check("psc-sync", &SyncConfig::REQUIRED_ENV, &SyncConfig::OPTIONAL_ENV)?;
    let cfg = SyncConfig::from_env()?;
    env_util::db_url()?;
    info!(config = ?cfg, "configuration ok");
    Ok(true)
}
