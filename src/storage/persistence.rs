use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;
use crate::data::types::{Snapshot, Value};
use crate::evaluation::types::{EvaluatedBet, GameResult, Outcome, Pick};

/// SQLite-backed line history, results table and evaluated-bets ledger.
/// Every multi-row write commits in a single transaction.
pub struct BettingDatabase {
    conn: Connection,
}

impl BettingDatabase {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS line_history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                sport TEXT NOT NULL,
                game_id TEXT NOT NULL,
                home_team TEXT NOT NULL,
                away_team TEXT NOT NULL,
                start_time TEXT NOT NULL,
                scraped_at TEXT NOT NULL,
                status TEXT NOT NULL,
                metrics TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ingested_files (
                sport TEXT NOT NULL,
                file_name TEXT NOT NULL,
                ingested_at TIMESTAMP NOT NULL,
                PRIMARY KEY (sport, file_name)
            );

            CREATE TABLE IF NOT EXISTS game_results (
                sport TEXT NOT NULL,
                game_id TEXT NOT NULL,
                status TEXT NOT NULL,
                home_score REAL,
                away_score REAL,
                start_time TEXT,
                fetched_at TIMESTAMP NOT NULL,
                PRIMARY KEY (sport, game_id)
            );

            CREATE TABLE IF NOT EXISTS evaluated_bets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sport TEXT NOT NULL,
                model TEXT NOT NULL,
                rank INTEGER NOT NULL,
                game_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                match_label TEXT NOT NULL,
                pick TEXT NOT NULL,
                odds REAL,
                units REAL NOT NULL,
                confidence_pct REAL,
                reason TEXT NOT NULL,
                predicted_score TEXT NOT NULL,
                bet_home_spread INTEGER NOT NULL,
                bet_home_ml INTEGER NOT NULL,
                bet_away_spread INTEGER NOT NULL,
                bet_away_ml INTEGER NOT NULL,
                bet_over INTEGER NOT NULL,
                bet_under INTEGER NOT NULL,
                home_money_line REAL,
                away_money_line REAL,
                tie_money_line REAL,
                total_score REAL,
                over_odds REAL,
                under_odds REAL,
                home_spread REAL,
                home_spread_odds REAL,
                away_spread REAL,
                away_spread_odds REAL,
                timestamp TEXT NOT NULL,
                date TEXT NOT NULL,
                status TEXT NOT NULL,
                home_score REAL NOT NULL,
                away_score REAL NOT NULL,
                outcome TEXT NOT NULL,
                payout REAL NOT NULL,
                graded_at TIMESTAMP NOT NULL,
                UNIQUE (sport, model, game_id, rank, pick)
            );

            CREATE INDEX IF NOT EXISTS idx_line_history_sport ON line_history(sport, seq);
            CREATE INDEX IF NOT EXISTS idx_evaluated_sport_model ON evaluated_bets(sport, model);
            "#,
        )?;

        Ok(Self { conn })
    }

    /// Line history for a sport in arrival order.
    pub fn load_line_history(&self, sport: &str) -> Result<Vec<Snapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT game_id, home_team, away_team, start_time, scraped_at, status, metrics
             FROM line_history
             WHERE sport = ?1
             ORDER BY seq",
        )?;

        let rows = stmt.query_map(params![sport], |row| {
            let metrics_json: String = row.get(6)?;
            Ok((
                Snapshot {
                    game_id: row.get(0)?,
                    home_team: row.get(1)?,
                    away_team: row.get(2)?,
                    start_time: row.get(3)?,
                    scraped_at: row.get(4)?,
                    status: row.get(5)?,
                    metrics: BTreeMap::new(),
                },
                metrics_json,
            ))
        })?;

        let mut snapshots = Vec::new();
        for row in rows {
            let (mut snapshot, metrics_json) = row?;
            snapshot.metrics = serde_json::from_str::<BTreeMap<String, Value>>(&metrics_json)
                .with_context(|| format!("Corrupt metrics for game {}", snapshot.game_id))?;
            snapshots.push(snapshot);
        }

        Ok(snapshots)
    }

    /// Snapshot files already folded into a sport's line history.
    pub fn ingested_files(&self, sport: &str) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_name FROM ingested_files WHERE sport = ?1")?;

        let names = stmt.query_map(params![sport], |row| row.get::<_, String>(0))?;
        names.collect::<Result<HashSet<String>, _>>().map_err(|e| e.into())
    }

    /// Replace a sport's line history with `snapshots` and mark `consumed_files`
    /// as ingested, in one transaction.
    pub fn replace_line_history(&self, sport: &str, snapshots: &[Snapshot], consumed_files: &[String]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute("DELETE FROM line_history WHERE sport = ?1", params![sport])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO line_history (sport, game_id, home_team, away_team, start_time, scraped_at, status, metrics)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for s in snapshots {
                stmt.execute(params![
                    sport,
                    s.game_id,
                    s.home_team,
                    s.away_team,
                    s.start_time,
                    s.scraped_at,
                    s.status,
                    serde_json::to_string(&s.metrics)?,
                ])?;
            }

            let mut mark = tx.prepare(
                "INSERT OR IGNORE INTO ingested_files (sport, file_name, ingested_at) VALUES (?1, ?2, ?3)",
            )?;
            let now = Utc::now().to_rfc3339();
            for name in consumed_files {
                mark.execute(params![sport, name, now])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Results table for a sport. An empty table is the bootstrap case.
    pub fn load_results(&self, sport: &str) -> Result<Vec<GameResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT game_id, status, home_score, away_score, start_time, fetched_at
             FROM game_results
             WHERE sport = ?1
             ORDER BY fetched_at, rowid",
        )?;

        let results = stmt.query_map(params![sport], |row| {
            let fetched_at: String = row.get(5)?;
            Ok(GameResult {
                game_id: row.get(0)?,
                status: row.get(1)?,
                home_score: row.get(2)?,
                away_score: row.get(3)?,
                start_time: row.get(4)?,
                fetched_at: parse_stored_time(&fetched_at),
            })
        })?;

        results.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    /// Upsert results keyed by game id; the row written last wins.
    pub fn upsert_results(&self, sport: &str, results: &[GameResult]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO game_results (sport, game_id, status, home_score, away_score, start_time, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(sport, game_id) DO UPDATE SET
                    status = excluded.status,
                    home_score = excluded.home_score,
                    away_score = excluded.away_score,
                    start_time = COALESCE(excluded.start_time, game_results.start_time),
                    fetched_at = excluded.fetched_at",
            )?;
            for r in results {
                stmt.execute(params![
                    sport,
                    r.game_id,
                    r.status,
                    r.home_score,
                    r.away_score,
                    r.start_time,
                    r.fetched_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Append graded bets to the ledger. Rows already present (same model, game,
    /// rank and pick) are left untouched; the newly inserted bets are returned.
    pub fn append_evaluated(&self, sport: &str, bets: &[EvaluatedBet]) -> Result<Vec<EvaluatedBet>> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = Vec::new();
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO evaluated_bets (
                    sport, model, rank, game_id, start_time, match_label, pick, odds, units,
                    confidence_pct, reason, predicted_score,
                    bet_home_spread, bet_home_ml, bet_away_spread, bet_away_ml, bet_over, bet_under,
                    home_money_line, away_money_line, tie_money_line, total_score, over_odds, under_odds,
                    home_spread, home_spread_odds, away_spread, away_spread_odds, timestamp,
                    date, status, home_score, away_score, outcome, payout, graded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
                         ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34, ?35, ?36)",
            )?;

            for bet in bets {
                let p = &bet.pick;
                let changed = stmt.execute(params![
                    sport,
                    p.model,
                    p.rank,
                    p.game_id,
                    p.start_time,
                    p.match_label,
                    p.pick,
                    p.odds,
                    p.units,
                    p.confidence_pct,
                    p.reason,
                    p.predicted_score,
                    p.bet_home_spread,
                    p.bet_home_ml,
                    p.bet_away_spread,
                    p.bet_away_ml,
                    p.bet_over,
                    p.bet_under,
                    p.home_money_line,
                    p.away_money_line,
                    p.tie_money_line,
                    p.total_score,
                    p.over_odds,
                    p.under_odds,
                    p.home_spread,
                    p.home_spread_odds,
                    p.away_spread,
                    p.away_spread_odds,
                    p.timestamp,
                    bet.date,
                    bet.status,
                    bet.home_score,
                    bet.away_score,
                    bet.outcome.as_str(),
                    bet.payout,
                    bet.graded_at.to_rfc3339(),
                ])?;
                if changed == 1 {
                    inserted.push(bet.clone());
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Ledger for a sport in append order, optionally restricted to one model.
    pub fn load_evaluated(&self, sport: &str, model: Option<&str>) -> Result<Vec<EvaluatedBet>> {
        let mut stmt = self.conn.prepare(
            "SELECT model, rank, game_id, start_time, match_label, pick, odds, units,
                    confidence_pct, reason, predicted_score,
                    bet_home_spread, bet_home_ml, bet_away_spread, bet_away_ml, bet_over, bet_under,
                    home_money_line, away_money_line, tie_money_line, total_score, over_odds, under_odds,
                    home_spread, home_spread_odds, away_spread, away_spread_odds, timestamp,
                    date, status, home_score, away_score, outcome, payout, graded_at
             FROM evaluated_bets
             WHERE sport = ?1 AND (?2 IS NULL OR model = ?2)
             ORDER BY id",
        )?;

        let bets = stmt.query_map(params![sport, model], evaluated_from_row)?;
        bets.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    /// Count ledger rows for a sport
    pub fn count_evaluated(&self, sport: &str) -> Result<usize> {
        let count: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM evaluated_bets WHERE sport = ?1",
            params![sport],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn parse_stored_time(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
            warn!("Stored timestamp {:?} unreadable ({}), using epoch", raw, e);
            DateTime::<Utc>::default()
        }
    }
}

fn evaluated_from_row(row: &Row<'_>) -> rusqlite::Result<EvaluatedBet> {
    let outcome_str: String = row.get(32)?;
    let outcome = outcome_str.parse::<Outcome>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            32,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;
    let graded_at: String = row.get(34)?;

    Ok(EvaluatedBet {
        pick: Pick {
            model: row.get(0)?,
            rank: row.get(1)?,
            game_id: row.get(2)?,
            start_time: row.get(3)?,
            match_label: row.get(4)?,
            pick: row.get(5)?,
            odds: row.get(6)?,
            units: row.get(7)?,
            confidence_pct: row.get(8)?,
            reason: row.get(9)?,
            predicted_score: row.get(10)?,
            bet_home_spread: row.get(11)?,
            bet_home_ml: row.get(12)?,
            bet_away_spread: row.get(13)?,
            bet_away_ml: row.get(14)?,
            bet_over: row.get(15)?,
            bet_under: row.get(16)?,
            home_money_line: row.get(17)?,
            away_money_line: row.get(18)?,
            tie_money_line: row.get(19)?,
            total_score: row.get(20)?,
            over_odds: row.get(21)?,
            under_odds: row.get(22)?,
            home_spread: row.get(23)?,
            home_spread_odds: row.get(24)?,
            away_spread: row.get(25)?,
            away_spread_odds: row.get(26)?,
            timestamp: row.get(27)?,
        },
        date: row.get(28)?,
        status: row.get(29)?,
        home_score: row.get(30)?,
        away_score: row.get(31)?,
        outcome,
        payout: row.get(33)?,
        graded_at: parse_stored_time(&graded_at),
    })
}
