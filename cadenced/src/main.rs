use anyhow::Context;
use cadenced::daemon::{self, DaemonConfig, DaemonRuntime, LocalState};
use cadenced::storage::CredentialStore;
use cadenced::sync::summary::SyncStatusSummary;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    SyncNow,
    Status,
    Logout,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--sync-now" => mode = CliMode::SyncNow,
            "--status" => mode = CliMode::Status,
            "--logout" => mode = CliMode::Logout,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cadenced=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(summary: &SyncStatusSummary) {
    println!("pending records:     {}", summary.pending_count);
    match summary.last_sync_time_millis {
        Some(millis) => println!("last sync (ms):      {millis}"),
        None => println!("last sync (ms):      never"),
    }
    println!("last conflict count: {}", summary.last_conflict_count);
    if let Some(millis) = summary.last_conflict_timestamp {
        println!("last conflict (ms):  {millis}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: cadenced [--sync-now | --status | --logout]");
        println!("  --sync-now  Run one sync pass and print the status");
        println!("  --status    Print pending records and last sync telemetry");
        println!("  --logout    Remove the saved API token and sync telemetry");
        return Ok(());
    }

    let config = DaemonConfig::from_env()?;
    match mode {
        CliMode::Status => {
            let credentials = CredentialStore::new().context("failed to open keyring")?;
            let state = LocalState::open(&config, &credentials).await?;
            print_summary(&state.status().await?);
            Ok(())
        }
        CliMode::Logout => {
            let credentials = CredentialStore::new().context("failed to open keyring")?;
            daemon::logout(&config, &credentials)?;
            tracing::info!("saved token and sync telemetry removed");
            Ok(())
        }
        CliMode::SyncNow => {
            let runtime = DaemonRuntime::bootstrap(config).await?;
            print_summary(&runtime.sync_now().await?);
            Ok(())
        }
        CliMode::Run | CliMode::Help => DaemonRuntime::bootstrap(config).await?.run().await,
    }
}
