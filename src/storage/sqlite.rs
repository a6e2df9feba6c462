//! SQLite record store.
//!
//! Decimals are stored as TEXT to keep them exact, timestamps as
//! fixed-width RFC 3339 strings so that lexical order is time order.
//! Conditional transitions are single `UPDATE … WHERE` statements; the
//! run-completion path opens its transaction with that write so SQLite
//! serialises concurrent completions before the risk windows are read.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, Transaction,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{RecordStore, RunCompletion, StoreError};
use crate::types::{
    ChainFamily, CycleLog, CycleStatus, QuoteSource, RefillRequest, Rejection, RiskScope,
    RiskWindow, Run, RunId, RunStatus, SafetyAuditEntry, SafetyState, Strategy, StrategyId,
    WalletRole,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS strategies (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        body TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        strategy_id TEXT NOT NULL,
        family TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        estimated_profit TEXT NOT NULL,
        estimated_gas_cost TEXT NOT NULL,
        realized_profit TEXT,
        approved INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        error_message TEXT,
        quote_source TEXT NOT NULL,
        last_rejection TEXT,
        tx_reference TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_runs_status ON runs (status, approved, started_at)",
    r#"
    CREATE TABLE IF NOT EXISTS risk_windows (
        scope TEXT NOT NULL,
        day TEXT NOT NULL,
        total_trades INTEGER NOT NULL DEFAULT 0,
        total_loss TEXT NOT NULL DEFAULT '0',
        PRIMARY KEY (scope, day)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS safety_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        version INTEGER NOT NULL,
        body TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS safety_audit (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL,
        version INTEGER NOT NULL,
        actor TEXT NOT NULL,
        action TEXT NOT NULL,
        changes TEXT NOT NULL,
        at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS refill_requests (
        id TEXT PRIMARY KEY,
        role TEXT NOT NULL,
        family TEXT NOT NULL,
        wallet TEXT NOT NULL,
        balance TEXT NOT NULL,
        min_balance TEXT NOT NULL,
        requested_at TEXT NOT NULL,
        fulfilled_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cycle_logs (
        id TEXT PRIMARY KEY,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        overall_status TEXT NOT NULL,
        stages TEXT NOT NULL
    )
    "#,
];

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn corrupt(table: &'static str, message: impl ToString) -> StoreError {
    StoreError::Corrupt {
        table,
        message: message.to_string(),
    }
}

fn parse_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(table, format!("timestamp {raw}: {e}")))
}

fn parse_opt_ts(table: &'static str, raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|s| parse_ts(table, &s)).transpose()
}

fn parse_decimal(table: &'static str, raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw).map_err(|e| corrupt(table, format!("decimal {raw}: {e}")))
}

fn parse_uuid(table: &'static str, raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| corrupt(table, format!("uuid {raw}: {e}")))
}

fn parse_enum<T: FromStr<Err = anyhow::Error>>(table: &'static str, raw: &str) -> Result<T, StoreError> {
    raw.parse::<T>().map_err(|e| corrupt(table, e))
}

fn to_json<T: serde::Serialize>(table: &'static str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| corrupt(table, e))
}

fn from_json<T: serde::de::DeserializeOwned>(table: &'static str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| corrupt(table, e))
}

fn run_from_row(row: &SqliteRow) -> Result<Run, StoreError> {
    const T: &str = "runs";
    let last_rejection: Option<String> = row.try_get("last_rejection")?;
    let realized: Option<String> = row.try_get("realized_profit")?;
    Ok(Run {
        id: parse_uuid(T, &row.try_get::<String, _>("id")?)?,
        strategy_id: parse_uuid(T, &row.try_get::<String, _>("strategy_id")?)?,
        family: parse_enum(T, &row.try_get::<String, _>("family")?)?,
        started_at: parse_ts(T, &row.try_get::<String, _>("started_at")?)?,
        finished_at: parse_opt_ts(T, row.try_get("finished_at")?)?,
        estimated_profit: parse_decimal(T, &row.try_get::<String, _>("estimated_profit")?)?,
        estimated_gas_cost: parse_decimal(T, &row.try_get::<String, _>("estimated_gas_cost")?)?,
        realized_profit: realized.map(|r| parse_decimal(T, &r)).transpose()?,
        approved_for_auto_execution: row.try_get::<i64, _>("approved")? != 0,
        status: parse_enum(T, &row.try_get::<String, _>("status")?)?,
        error_message: row.try_get("error_message")?,
        quote_source: parse_enum::<QuoteSource>(T, &row.try_get::<String, _>("quote_source")?)?,
        last_rejection: last_rejection
            .map(|r| from_json::<Rejection>(T, &r))
            .transpose()?,
        tx_reference: row.try_get("tx_reference")?,
    })
}

fn body(row: &SqliteRow) -> Result<String, StoreError> {
    Ok(row.try_get::<String, _>("body")?)
}

fn refill_from_row(row: &SqliteRow) -> Result<RefillRequest, StoreError> {
    const T: &str = "refill_requests";
    Ok(RefillRequest {
        id: parse_uuid(T, &row.try_get::<String, _>("id")?)?,
        role: parse_enum(T, &row.try_get::<String, _>("role")?)?,
        family: parse_enum(T, &row.try_get::<String, _>("family")?)?,
        wallet: row.try_get("wallet")?,
        balance: parse_decimal(T, &row.try_get::<String, _>("balance")?)?,
        min_balance: parse_decimal(T, &row.try_get::<String, _>("min_balance")?)?,
        requested_at: parse_ts(T, &row.try_get::<String, _>("requested_at")?)?,
        fulfilled_at: parse_opt_ts(T, row.try_get("fulfilled_at")?)?,
    })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// `RecordStore` backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `database_url` and apply
    /// the schema. `sqlite::memory:` yields a private single-connection database.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool_options = if in_memory {
            // Every connection to :memory: is a separate database.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;

        for statement in SCHEMA {
            sqlx::query(*statement).execute(&pool).await?;
        }

        info!(database_url, "Record store ready");
        Ok(Self { pool })
    }

    async fn bump_window(
        tx: &mut Transaction<'_, Sqlite>,
        scope: RiskScope,
        day: NaiveDate,
        loss: Decimal,
    ) -> Result<(), StoreError> {
        let key = scope.key();
        let day = day.to_string();

        sqlx::query(
            "INSERT INTO risk_windows (scope, day, total_trades, total_loss) VALUES (?, ?, 0, '0') \
             ON CONFLICT(scope, day) DO NOTHING",
        )
        .bind(&key)
        .bind(&day)
        .execute(&mut **tx)
        .await?;

        let row = sqlx::query("SELECT total_loss FROM risk_windows WHERE scope = ? AND day = ?")
            .bind(&key)
            .bind(&day)
            .fetch_one(&mut **tx)
            .await?;
        let current = parse_decimal("risk_windows", &row.try_get::<String, _>("total_loss")?)?;

        sqlx::query(
            "UPDATE risk_windows SET total_trades = total_trades + 1, total_loss = ? \
             WHERE scope = ? AND day = ?",
        )
        .bind((current + loss).to_string())
        .bind(&key)
        .bind(&day)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO strategies (id, name, created_at, body) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, body = excluded.body
            "#,
        )
        .bind(strategy.id.to_string())
        .bind(&strategy.name)
        .bind(ts(strategy.created_at))
        .bind(to_json("strategies", strategy)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_strategy(&self, id: StrategyId) -> Result<Option<Strategy>, StoreError> {
        let row = sqlx::query("SELECT body FROM strategies WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(from_json("strategies", &body(&row)?)?)),
            None => Ok(None),
        }
    }

    async fn list_strategies(&self) -> Result<Vec<Strategy>, StoreError> {
        let rows = sqlx::query("SELECT body FROM strategies ORDER BY created_at, name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<Strategy, StoreError> { from_json("strategies", &body(row)?) })
            .collect()
    }

    async fn insert_run(&self, run: &Run) -> Result<(), StoreError> {
        let rejection = run
            .last_rejection
            .as_ref()
            .map(|r| to_json("runs", r))
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO runs (
                id, strategy_id, family, started_at, finished_at, estimated_profit,
                estimated_gas_cost, realized_profit, approved, status, error_message,
                quote_source, last_rejection, tx_reference
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.strategy_id.to_string())
        .bind(run.family.as_str())
        .bind(ts(run.started_at))
        .bind(run.finished_at.map(ts))
        .bind(run.estimated_profit.to_string())
        .bind(run.estimated_gas_cost.to_string())
        .bind(run.realized_profit.map(|p| p.to_string()))
        .bind(run.approved_for_auto_execution as i64)
        .bind(run.status.as_str())
        .bind(run.error_message.as_deref())
        .bind(run.quote_source.as_str())
        .bind(rejection)
        .bind(run.tx_reference.as_deref())
        .execute(&self.pool)
        .await?;
        debug!(run_id = %run.id, "Run persisted");
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query("SELECT * FROM runs ORDER BY seq DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn runs_awaiting_decision(&self, since: DateTime<Utc>) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM runs
            WHERE status = 'SIMULATED' AND approved = 0 AND error_message IS NULL
              AND started_at >= ?
            ORDER BY started_at, seq
            "#,
        )
        .bind(ts(since))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn runs_awaiting_execution(&self) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM runs WHERE status = 'SIMULATED' AND approved = 1 ORDER BY started_at, seq",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn runs_in_flight(&self) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query("SELECT * FROM runs WHERE status = 'EXECUTING' ORDER BY started_at, seq")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn record_rejections(&self, rejections: &[(RunId, Rejection)]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (id, rejection) in rejections {
            sqlx::query(
                "UPDATE runs SET last_rejection = ? WHERE id = ? AND status = 'SIMULATED' AND approved = 0",
            )
            .bind(to_json("runs", rejection)?)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn approve_runs(&self, ids: &[RunId]) -> Result<Vec<RunId>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut approved = Vec::with_capacity(ids.len());
        for id in ids {
            let result = sqlx::query(
                "UPDATE runs SET approved = 1, last_rejection = NULL \
                 WHERE id = ? AND status = 'SIMULATED' AND approved = 0",
            )
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 1 {
                approved.push(*id);
            }
        }
        tx.commit().await?;
        Ok(approved)
    }

    async fn claim_run(&self, id: RunId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE runs SET status = 'EXECUTING' WHERE id = ? AND status = 'SIMULATED' AND approved = 1",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_run(&self, completion: &RunCompletion) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?, realized_profit = ?, error_message = ?, tx_reference = ?, finished_at = ?
            WHERE id = ? AND status = 'EXECUTING'
            "#,
        )
        .bind(completion.status.as_str())
        .bind(completion.realized_profit.map(|p| p.to_string()))
        .bind(completion.error_message.as_deref())
        .bind(completion.tx_reference.as_deref())
        .bind(ts(completion.finished_at))
        .bind(completion.run_id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::bump_window(&mut tx, RiskScope::Strategy(completion.strategy_id), completion.day, completion.loss)
            .await?;
        Self::bump_window(&mut tx, RiskScope::Global, completion.day, completion.loss).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn risk_window(&self, scope: RiskScope, day: NaiveDate) -> Result<RiskWindow, StoreError> {
        let row = sqlx::query("SELECT total_trades, total_loss FROM risk_windows WHERE scope = ? AND day = ?")
            .bind(scope.key())
            .bind(day.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let trades: i64 = row.try_get("total_trades")?;
                Ok(RiskWindow {
                    scope,
                    day,
                    total_trades: u32::try_from(trades)
                        .map_err(|e| corrupt("risk_windows", format!("total_trades {trades}: {e}")))?,
                    total_loss: parse_decimal("risk_windows", &row.try_get::<String, _>("total_loss")?)?,
                })
            }
            None => Ok(RiskWindow::empty(scope, day)),
        }
    }

    async fn load_safety_state(&self) -> Result<Option<SafetyState>, StoreError> {
        let row = sqlx::query("SELECT body FROM safety_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(from_json("safety_state", &body(&row)?)?)),
            None => Ok(None),
        }
    }

    async fn commit_safety_state(
        &self,
        expected_version: u64,
        state: &SafetyState,
        audit: &SafetyAuditEntry,
    ) -> Result<(), StoreError> {
        let body = to_json("safety_state", state)?;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE safety_state SET version = ?, body = ? WHERE id = 1 AND version = ?")
            .bind(state.version as i64)
            .bind(&body)
            .bind(expected_version as i64)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let committed = if updated == 1 {
            true
        } else if expected_version == 0 {
            sqlx::query("INSERT INTO safety_state (id, version, body) VALUES (1, ?, ?) ON CONFLICT(id) DO NOTHING")
                .bind(state.version as i64)
                .bind(&body)
                .execute(&mut *tx)
                .await?
                .rows_affected()
                == 1
        } else {
            false
        };

        if !committed {
            let found = sqlx::query_scalar::<_, i64>("SELECT version FROM safety_state WHERE id = 1")
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                found: found.unwrap_or(0).max(0) as u64,
            });
        }

        sqlx::query(
            "INSERT INTO safety_audit (id, version, actor, action, changes, at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(audit.id.to_string())
        .bind(audit.version as i64)
        .bind(&audit.actor)
        .bind(&audit.action)
        .bind(to_json("safety_audit", &audit.changes)?)
        .bind(ts(audit.at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn safety_audit(&self, limit: usize) -> Result<Vec<SafetyAuditEntry>, StoreError> {
        const T: &str = "safety_audit";
        let rows = sqlx::query("SELECT * FROM safety_audit ORDER BY seq DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<SafetyAuditEntry, StoreError> {
                let version: i64 = row.try_get("version")?;
                Ok(SafetyAuditEntry {
                    id: parse_uuid(T, &row.try_get::<String, _>("id")?)?,
                    version: version.max(0) as u64,
                    actor: row.try_get("actor")?,
                    action: row.try_get("action")?,
                    changes: from_json(T, &row.try_get::<String, _>("changes")?)?,
                    at: parse_ts(T, &row.try_get::<String, _>("at")?)?,
                })
            })
            .collect()
    }

    async fn has_pending_refill(&self, role: WalletRole, family: ChainFamily) -> Result<bool, StoreError> {
        let pending = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM refill_requests WHERE role = ? AND family = ? AND fulfilled_at IS NULL",
        )
        .bind(role.as_str())
        .bind(family.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(pending > 0)
    }

    async fn open_refill_request(&self, request: &RefillRequest) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO refill_requests (id, role, family, wallet, balance, min_balance, requested_at, fulfilled_at)
            SELECT ?, ?, ?, ?, ?, ?, ?, NULL
            WHERE NOT EXISTS (
                SELECT 1 FROM refill_requests WHERE role = ? AND family = ? AND fulfilled_at IS NULL
            )
            "#,
        )
        .bind(request.id.to_string())
        .bind(request.role.as_str())
        .bind(request.family.as_str())
        .bind(&request.wallet)
        .bind(request.balance.to_string())
        .bind(request.min_balance.to_string())
        .bind(ts(request.requested_at))
        .bind(request.role.as_str())
        .bind(request.family.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fulfil_refill_requests(
        &self,
        role: WalletRole,
        family: ChainFamily,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refill_requests SET fulfilled_at = ? WHERE role = ? AND family = ? AND fulfilled_at IS NULL",
        )
        .bind(ts(at))
        .bind(role.as_str())
        .bind(family.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn refill_requests(&self, pending_only: bool) -> Result<Vec<RefillRequest>, StoreError> {
        let sql = if pending_only {
            "SELECT * FROM refill_requests WHERE fulfilled_at IS NULL ORDER BY requested_at DESC"
        } else {
            "SELECT * FROM refill_requests ORDER BY requested_at DESC"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(refill_from_row).collect()
    }

    async fn save_cycle_log(&self, log: &CycleLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cycle_logs (id, started_at, finished_at, overall_status, stages)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                finished_at = excluded.finished_at,
                overall_status = excluded.overall_status,
                stages = excluded.stages
            "#,
        )
        .bind(log.id.to_string())
        .bind(ts(log.started_at))
        .bind(log.finished_at.map(ts))
        .bind(log.overall_status.as_str())
        .bind(to_json("cycle_logs", &log.stages)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_cycle_logs(&self, limit: usize) -> Result<Vec<CycleLog>, StoreError> {
        const T: &str = "cycle_logs";
        let rows = sqlx::query("SELECT * FROM cycle_logs ORDER BY started_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<CycleLog, StoreError> {
                Ok(CycleLog {
                    id: parse_uuid(T, &row.try_get::<String, _>("id")?)?,
                    started_at: parse_ts(T, &row.try_get::<String, _>("started_at")?)?,
                    finished_at: parse_opt_ts(T, row.try_get("finished_at")?)?,
                    overall_status: parse_enum::<CycleStatus>(T, &row.try_get::<String, _>("overall_status")?)?,
                    stages: from_json(T, &row.try_get::<String, _>("stages")?)?,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
