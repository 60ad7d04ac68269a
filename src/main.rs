use anyhow::Result;
use chrono::Utc;
use tracing_subscriber::EnvFilter;
use betting_ledger::config::{Config, EnvConfig};
use betting_ledger::evaluation::reconciler::CsvResultsFeed;
use betting_ledger::pipeline::{run_sport, RunContext};
use betting_ledger::storage::persistence::BettingDatabase;

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Betting ledger starting...");

    // Load configuration
    let env_config = EnvConfig::load()?;
    tracing::info!("Loading configuration from {}", env_config.config_path);
    let config = Config::load(&env_config.config_path)?;

    let dry_run = env_config.dry_run.unwrap_or(config.system.dry_run);
    let tz = config.timezone()?;
    tracing::info!("Dry run mode: {}", dry_run);
    tracing::info!("Timezone: {}", tz);

    // Initialize database
    tracing::info!("Initializing database: {}", config.system.database_path);
    if let Some(parent) = std::path::Path::new(&config.system.database_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = BettingDatabase::new(&config.system.database_path)?;

    let feed = CsvResultsFeed::new(config.paths.fetched_results_dir.clone(), tz);
    let now = Utc::now();

    for sport in &config.sports {
        let ctx = RunContext::new(sport.clone(), tz, now, dry_run);
        match run_sport(&db, &feed, &config, &ctx) {
            Ok(run) => tracing::info!(
                "{} done: {} models evaluated, {} bets added",
                sport.name,
                run.evaluations.len(),
                run.evaluations.iter().map(|e| e.graded_now.len()).sum::<usize>()
            ),
            Err(e) => tracing::error!("{} run failed: {:#}", sport.name, e),
        }
    }

    for sport in &config.sports {
        tracing::info!("{} ledger rows: {}", sport.name, db.count_evaluated(&sport.name)?);
    }

    Ok(())
}
