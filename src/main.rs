use std::env;
use std::process;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use txn_loadgen::config::Settings;
use txn_loadgen::context::RunContext;
use txn_loadgen::pipeline::{self, Loader, LoaderError, RunSummary};
use txn_loadgen::seed::SeedCatalogue;

/// `debug_level` 0-1 → info, 2 → debug, 3+ → trace. `RUST_LOG` wins.
fn init_logging(debug_level: u8) {
    let default_level = match debug_level {
        0 | 1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Logging already initialised: {}", e);
    }
}

/// First positional argument, then `RUN_MODE`, then `dev`.
fn run_mode() -> String {
    env::args()
        .nth(1)
        .or_else(|| env::var("RUN_MODE").ok())
        .unwrap_or_else(|| "dev".to_string())
}

async fn run(settings: &Settings) -> Result<RunSummary, LoaderError> {
    let seed = SeedCatalogue::load(&settings.general.seed_file)?;
    let poster = pipeline::connect(settings)?;

    let mut loader = Loader::new(settings, &seed, RunContext::new_system(), poster)?;
    loader.echo_startup();
    loader.run().await
}

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenv::dotenv().ok();

    let mode = run_mode();
    let settings = match Settings::load(&mode) {
        Ok(s) => s,
        Err(e) => {
            init_logging(0);
            error!("❌ Failed to load configuration for '{}': {}", mode, e);
            process::exit(1);
        }
    };
    init_logging(settings.general.debug_level);

    info!("╔═══════════════════════════════════════════════════════════════╗");
    info!("║               TXN LOADGEN                                     ║");
    info!("║               Fraud API Load Generator & Scenario Replayer    ║");
    info!("╚═══════════════════════════════════════════════════════════════╝");
    info!(run_mode = %mode, service = settings.service_label(), "Configuration loaded");

    match run(&settings).await {
        Ok(summary) => {
            summary.log();
            info!("✅ Run complete");
        }
        Err(e) => {
            error!("❌ Run aborted: {}", e);
            process::exit(1);
        }
    }
}
