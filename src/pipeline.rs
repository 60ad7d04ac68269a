use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use crate::config::{Config, PromptConfig, SportConfig};
use crate::data::csv_table::CsvTable;
use crate::data::types::Snapshot;
use crate::evaluation::grader::{find_score_drift, grade, grade_picks};
use crate::evaluation::picks::{load_picks, picks_path};
use crate::evaluation::reconciler::{merge_results, reconcile, ResultsFeed};
use crate::evaluation::summary::PerformanceSummary;
use crate::evaluation::types::EvaluatedBet;
use crate::lines::aggregator::aggregate;
use crate::lines::change_filter::{filter_on_change, ChangeTolerance};
use crate::lines::prompt_input::{build_prompt_input, select_upcoming, within_window, PromptInput};
use crate::monitoring::logger::CsvLogger;
use crate::storage::persistence::BettingDatabase;

/// Everything a run needs to know about where it is, fixed at start-up.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub sport: SportConfig,
    pub tz: Tz,
    pub now: DateTime<Utc>,
    /// Compute everything but write nothing.
    pub dry_run: bool,
}

impl RunContext {
    pub fn new(sport: SportConfig, tz: Tz, now: DateTime<Utc>, dry_run: bool) -> Self {
        Self { sport, tz, now, dry_run }
    }

    pub fn sport_name(&self) -> &str {
        &self.sport.name
    }
}

/// Scrape rows read this run and the files they came from.
#[derive(Debug, Default)]
pub struct SnapshotBatch {
    pub snapshots: Vec<Snapshot>,
    pub files: Vec<String>,
}

/// Read every `<sport>_*.csv` scrape in `dir` not yet folded into the line history,
/// oldest file name first, keeping scheduled games only. Rows without their own
/// scrape time are stamped with `now`.
pub fn ingest_snapshot_files(
    db: &BettingDatabase,
    dir: &Path,
    sport: &str,
    now: DateTime<Utc>,
) -> Result<SnapshotBatch> {
    if !dir.is_dir() {
        info!("No snapshot directory at {}", dir.display());
        return Ok(SnapshotBatch::default());
    }

    let consumed = db.ingested_files(sport)?;
    let prefix = format!("{}_", sport);
    let mut files: Vec<(String, PathBuf)> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list snapshots in {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?.to_string();
            (name.starts_with(&prefix) && name.ends_with(".csv")).then_some((name, path))
        })
        .collect();
    files.sort();

    let stamp = now.to_rfc3339();
    let mut batch = SnapshotBatch::default();

    for (name, path) in files {
        if consumed.contains(&name) {
            continue;
        }

        let table = CsvTable::read(&path)?;
        let before = batch.snapshots.len();
        batch.snapshots.extend(
            table
                .rows()
                .filter_map(|row| Snapshot::from_row(&row, &stamp))
                .filter(Snapshot::is_scheduled),
        );
        info!(
            "Ingested {} scheduled snapshots from {}",
            batch.snapshots.len() - before,
            path.display()
        );
        batch.files.push(name);
    }

    Ok(batch)
}

#[derive(Debug)]
pub struct LineHistoryUpdate {
    pub history: Vec<Snapshot>,
    pub total_records: usize,
}

/// Append fresh snapshots to the sport's line history and compress it so only
/// line movements survive. The batch's files are marked consumed in the same write.
pub fn update_line_history(
    db: &BettingDatabase,
    ctx: &RunContext,
    dimension_columns: &[String],
    tolerance: &ChangeTolerance,
    fresh: &SnapshotBatch,
) -> Result<LineHistoryUpdate> {
    let mut all = db.load_line_history(ctx.sport_name())?;
    all.extend_from_slice(&fresh.snapshots);
    let total_records = all.len();

    let history = filter_on_change(all, dimension_columns, &ctx.sport.change_metrics, tolerance);
    info!("Total records: {}", total_records);
    info!("Filtered records: {}", history.len());

    if ctx.dry_run {
        info!("Dry run: line history not written");
    } else {
        db.replace_line_history(ctx.sport_name(), &history, &fresh.files)?;
    }

    Ok(LineHistoryUpdate { history, total_records })
}

/// Prompt inputs for each of the sport's models: the upcoming games in the latest
/// scrape, aggregated over their line history, plus the model's own track record.
pub fn build_prompt_inputs(
    db: &BettingDatabase,
    ctx: &RunContext,
    prompt: &PromptConfig,
    history: &[Snapshot],
    fresh: &[Snapshot],
) -> Result<Vec<(String, PromptInput)>> {
    let current_ids: HashSet<String> = fresh.iter().map(|s| s.game_id.clone()).collect();
    let selected: HashSet<String> = select_upcoming(history, &current_ids, prompt.max_games)
        .into_iter()
        .collect();

    let records: Vec<Snapshot> = history
        .iter()
        .filter(|s| selected.contains(&s.game_id))
        .cloned()
        .collect();

    let report = aggregate(&records, &prompt.group_columns, &ctx.sport.aggregate_metrics);
    for e in &report.errors {
        warn!("Skipping game in aggregate: {}", e);
    }
    let rows = within_window(report.rows, ctx.now, prompt.hours_ahead);

    let mut inputs = Vec::with_capacity(ctx.sport.models.len());
    for model in &ctx.sport.models {
        let model_history = db.load_evaluated(ctx.sport_name(), Some(model))?;
        if model_history.is_empty() {
            info!("No historical data found for {}", model);
        }
        let input = build_prompt_input(&rows, &ctx.sport.aggregate_metrics, &model_history, ctx.sport_name());
        inputs.push((model.clone(), input));
    }

    Ok(inputs)
}

/// Write `<sport>_<model>_games.csv` and `<sport>_<model>_history.csv` into `dir`.
/// A model with no games in the window gets no prompt, and any stale files from an
/// earlier run are removed.
pub fn write_prompt_inputs(dir: &Path, sport: &str, inputs: &[(String, PromptInput)]) -> Result<()> {
    fs::create_dir_all(dir)?;

    for (model, input) in inputs {
        let games = dir.join(format!("{}_{}_games.csv", sport, model));
        let history = dir.join(format!("{}_{}_history.csv", sport, model));

        if input.game_count == 0 {
            info!("No games in window for {}; skipping prompt", model);
            for stale in [&games, &history] {
                if stale.exists() {
                    fs::remove_file(stale)
                        .with_context(|| format!("Failed to remove stale {}", stale.display()))?;
                }
            }
            continue;
        }

        fs::write(&games, &input.games_csv)
            .with_context(|| format!("Failed to write {}", games.display()))?;
        fs::write(&history, &input.history_csv)
            .with_context(|| format!("Failed to write {}", history.display()))?;

        info!("Prompt input for {}: {} games", model, input.game_count);
    }

    Ok(())
}

#[derive(Debug)]
pub struct ModelEvaluation {
    pub model: String,
    /// Bets this run added to the ledger.
    pub graded_now: Vec<EvaluatedBet>,
    /// The model's full ledger after this run.
    pub history: Vec<EvaluatedBet>,
}

impl ModelEvaluation {
    pub fn summary(&self) -> PerformanceSummary {
        PerformanceSummary::from_bets(&self.history)
    }
}

/// Load one model's picks, fetch whatever results are still missing, and grade.
pub fn evaluate_model<F: ResultsFeed>(
    db: &BettingDatabase,
    feed: &F,
    ctx: &RunContext,
    picks_dir: &Path,
    csv_logger: Option<&CsvLogger>,
    model: &str,
) -> Result<ModelEvaluation> {
    let sport = ctx.sport_name();

    let (picks, pick_errors) = load_picks(&picks_path(picks_dir, sport, model), model)?;
    for e in &pick_errors {
        warn!("{} pick rejected: {}", model, e);
    }

    let existing = db.load_results(sport)?;
    let scope = reconcile(&picks, &existing, ctx.tz);

    let fetched = if scope.is_empty() {
        info!("No missing game results found. All picks are up-to-date.");
        Vec::new()
    } else {
        info!(
            "Found {} games missing results across {} dates. Fetching...",
            scope.missing_game_ids.len(),
            scope.dates.len()
        );
        let fetched = feed.fetch_results(sport, &scope.dates)?;
        if fetched.is_empty() {
            info!("Results feed returned no new results");
        }
        fetched
    };

    if !ctx.dry_run && !fetched.is_empty() {
        db.upsert_results(sport, &fetched)?;
    }
    let results = merge_results(existing, fetched);

    let (graded_now, ledger) = if ctx.dry_run {
        let report = grade_picks(&picks, &results, ctx.tz, ctx.now);
        info!("Dry run: {} picks graded, ledger not written", report.graded.len());
        let mut ledger = db.load_evaluated(sport, None)?;
        ledger.extend(report.graded.iter().cloned());
        (report.graded, ledger)
    } else {
        grade(db, &picks, &results, sport, ctx.tz, ctx.now)?
    };

    for bet in find_score_drift(&ledger, &results) {
        warn!(
            "Ledger score for game {} ({} {}-{}) no longer matches fetched result",
            bet.pick.game_id, bet.pick.model, bet.home_score, bet.away_score
        );
    }

    if let Some(logger) = csv_logger {
        if !ctx.dry_run && !graded_now.is_empty() {
            logger.log_bets(&graded_now)?;
        }
    }

    let history: Vec<EvaluatedBet> = ledger.into_iter().filter(|b| b.pick.model == model).collect();
    let evaluation = ModelEvaluation {
        model: model.to_string(),
        graded_now,
        history,
    };
    info!("{} {}: {}", sport, model, evaluation.summary());

    Ok(evaluation)
}

#[derive(Debug, Default)]
pub struct SportRun {
    pub prompt_inputs: Vec<(String, PromptInput)>,
    pub evaluations: Vec<ModelEvaluation>,
}

impl SportRun {
    /// Performance across every model that was evaluated.
    pub fn overall(&self) -> PerformanceSummary {
        PerformanceSummary::from_bets(self.evaluations.iter().flat_map(|e| e.history.iter()))
    }
}

/// One full pass for a sport: ingest scrapes, update line history, build prompt
/// inputs, then evaluate every model. A model whose picks can't be loaded is
/// logged and skipped.
pub fn run_sport<F: ResultsFeed>(
    db: &BettingDatabase,
    feed: &F,
    config: &Config,
    ctx: &RunContext,
) -> Result<SportRun> {
    let sport = ctx.sport_name();
    info!("Running {} (dry run: {})", sport, ctx.dry_run);

    let fresh = ingest_snapshot_files(db, &config.paths.snapshots_dir, sport, ctx.now)?;
    let update = update_line_history(
        db,
        ctx,
        &config.change_filter.dimension_columns,
        &config.change_filter.tolerance(),
        &fresh,
    )?;

    let mut run = SportRun::default();

    if fresh.snapshots.is_empty() {
        info!("No fresh {} snapshots; skipping prompt inputs", sport);
    } else {
        run.prompt_inputs = build_prompt_inputs(db, ctx, &config.prompt, &update.history, &fresh.snapshots)?;
        if !ctx.dry_run {
            write_prompt_inputs(&config.paths.prompt_dir, sport, &run.prompt_inputs)?;
        }
    }

    let csv_logger = if config.monitoring.csv_export && !ctx.dry_run {
        let path = config
            .paths
            .evaluated_dir
            .join(format!("{}_bet_picks_evaluated.csv", sport));
        Some(CsvLogger::new(path, sport)?)
    } else {
        None
    };

    for model in &ctx.sport.models {
        match evaluate_model(db, feed, ctx, &config.paths.picks_dir, csv_logger.as_ref(), model) {
            Ok(evaluation) => run.evaluations.push(evaluation),
            Err(e) => error!("Skipping {} {}: {:#}", sport, model, e),
        }
    }

    info!("{} overall: {}", sport, run.overall());
    Ok(run)
}
