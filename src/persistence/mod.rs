//! SQLite persistence for emitted allocation plans.
//!
//! Keeps the plan history so the schedule can compare against the last plan
//! across restarts:
//! - Plan header (time, regime, trigger, volatility scalar)
//! - Per-symbol target weights
//! - Warnings attached to each plan
//!
//! It also holds the cycle lock row that keeps two processes sharing one
//! database from rebalancing at the same time.

use crate::error::EngineError;
use crate::strategy::{AllocationPlan, PlanWarning, Regime, RebalanceTrigger};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

static LEASE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A stored plan with its row id and the trigger that produced it.
#[derive(Debug, Clone)]
pub struct PlanRecord {
    pub id: i64,
    pub trigger: Option<String>,
    pub plan: AllocationPlan,
}

/// SQLite-based plan store.
pub struct PlanStore {
    conn: Connection,
}

type PlanHeader = (i64, String, String, Option<String>, Option<String>, Option<String>);

/// Held cycle lock. Released when dropped.
pub struct CycleLease<'a> {
    store: &'a PlanStore,
    holder: String,
}

impl CycleLease<'_> {
    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl Drop for CycleLease<'_> {
    fn drop(&mut self) {
        match self.store.conn.execute(
            "DELETE FROM cycle_lock WHERE id = 1 AND holder = ?1",
            params![self.holder],
        ) {
            Ok(_) => debug!(holder = %self.holder, "Cycle lock released"),
            Err(e) => warn!(holder = %self.holder, error = %e, "Failed to release cycle lock"),
        }
    }
}

impl PlanStore {
    /// Open the store, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // Concurrent processes wait on each other's write transactions
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let store = Self { conn };
        store.init_schema()?;

        info!("Plan store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS plans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                generated_at TEXT NOT NULL,
                regime TEXT NOT NULL,
                trigger TEXT,
                volatility_scalar TEXT,
                realized_volatility TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_plans_generated_at ON plans(generated_at);

            CREATE TABLE IF NOT EXISTS plan_weights (
                plan_id INTEGER NOT NULL REFERENCES plans(id),
                symbol TEXT NOT NULL,
                weight TEXT NOT NULL,
                PRIMARY KEY (plan_id, symbol)
            );

            CREATE TABLE IF NOT EXISTS plan_warnings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plan_id INTEGER NOT NULL REFERENCES plans(id),
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_warnings_plan ON plan_warnings(plan_id);

            CREATE TABLE IF NOT EXISTS cycle_lock (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Take the cycle lock shared by every process using this database.
    ///
    /// Fails with `EngineError::CycleInProgress` while another holder's lock
    /// is younger than `stale_after`. Older locks are assumed abandoned and
    /// taken over.
    pub fn try_lock_cycle(&self, stale_after: Duration) -> Result<CycleLease<'_>> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT holder, acquired_at FROM cycle_lock WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let now = Utc::now();
        if let Some((holder, acquired_at)) = existing {
            let acquired_at = DateTime::parse_from_rfc3339(&acquired_at)
                .map(|dt| dt.with_timezone(&Utc))
                .ok();
            match acquired_at {
                Some(at) if now - at < stale_after => {
                    debug!(%holder, acquired_at = %at, "Cycle lock held elsewhere");
                    return Err(EngineError::CycleInProgress.into());
                }
                _ => warn!(%holder, "Taking over stale cycle lock"),
            }
        }

        let holder = format!(
            "{}-{}-{}",
            std::process::id(),
            now.timestamp_nanos_opt().unwrap_or_default(),
            LEASE_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        tx.execute(
            r#"
            INSERT INTO cycle_lock (id, holder, acquired_at) VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET holder = excluded.holder, acquired_at = excluded.acquired_at
            "#,
            params![holder, now.to_rfc3339()],
        )?;
        tx.commit()?;

        debug!(%holder, "Cycle lock acquired");
        Ok(CycleLease {
            store: self,
            holder,
        })
    }

    /// Save a plan and return its row id.
    pub fn save_plan(
        &self,
        plan: &AllocationPlan,
        trigger: Option<&RebalanceTrigger>,
    ) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO plans (generated_at, regime, trigger, volatility_scalar, realized_volatility)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                plan.generated_at().to_rfc3339(),
                plan.regime().as_str(),
                trigger.map(|t| t.to_string()),
                plan.volatility_scalar().map(|v| v.to_string()),
                plan.realized_volatility().map(|v| v.to_string()),
            ],
        )?;
        let plan_id = tx.last_insert_rowid();

        for (symbol, weight) in plan.weights() {
            tx.execute(
                "INSERT INTO plan_weights (plan_id, symbol, weight) VALUES (?1, ?2, ?3)",
                params![plan_id, symbol, weight.to_string()],
            )?;
        }

        for warning in plan.warnings() {
            let payload =
                serde_json::to_string(warning).context("Failed to serialize plan warning")?;
            tx.execute(
                "INSERT INTO plan_warnings (plan_id, payload) VALUES (?1, ?2)",
                params![plan_id, payload],
            )?;
        }

        tx.commit()?;

        debug!(
            plan_id,
            regime = %plan.regime(),
            positions = plan.weights().len(),
            "Plan saved to database"
        );
        Ok(plan_id)
    }

    /// Most recently generated plan.
    pub fn latest_plan(&self) -> Result<Option<PlanRecord>> {
        let header: Option<PlanHeader> = self
            .conn
            .query_row(
                r#"
                SELECT id, generated_at, regime, trigger, volatility_scalar, realized_volatility
                FROM plans
                ORDER BY generated_at DESC, id DESC
                LIMIT 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        header.map(|h| self.load_record(h)).transpose()
    }

    /// Up to `limit` plans, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<PlanRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, generated_at, regime, trigger, volatility_scalar, realized_volatility
            FROM plans
            ORDER BY generated_at DESC, id DESC
            LIMIT ?1
            "#,
        )?;

        let headers: Vec<PlanHeader> = stmt
            .query_map([limit], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<rusqlite::Result<_>>()?;

        headers.into_iter().map(|h| self.load_record(h)).collect()
    }

    /// Number of stored plans.
    pub fn plan_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM plans", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn load_record(&self, header: PlanHeader) -> Result<PlanRecord> {
        let (id, generated_at, regime, trigger, scalar, realized) = header;

        let generated_at = DateTime::parse_from_rfc3339(&generated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .with_context(|| format!("Invalid timestamp on plan {}", id))?;
        let regime = Regime::from_str(&regime)?;

        let mut stmt = self
            .conn
            .prepare("SELECT symbol, weight FROM plan_weights WHERE plan_id = ?1")?;
        let weights: BTreeMap<String, Decimal> = stmt
            .query_map([id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .filter_map(|r| match r {
                Ok(row) => Some(row),
                Err(e) => {
                    warn!(plan_id = id, error = %e, "Skipping unreadable plan weight row");
                    None
                }
            })
            .filter_map(|(symbol, weight)| match Decimal::from_str(&weight) {
                Ok(w) => Some((symbol, w)),
                Err(e) => {
                    warn!(plan_id = id, %symbol, %weight, error = %e, "Skipping unreadable plan weight");
                    None
                }
            })
            .collect();

        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM plan_warnings WHERE plan_id = ?1 ORDER BY id")?;
        let warnings: Vec<PlanWarning> = stmt
            .query_map([id], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|payload| match serde_json::from_str(&payload) {
                Ok(warning) => Some(warning),
                Err(e) => {
                    warn!(plan_id = id, error = %e, "Skipping unreadable plan warning");
                    None
                }
            })
            .collect();

        let parse = |v: Option<String>| v.and_then(|s| Decimal::from_str(&s).ok());

        Ok(PlanRecord {
            id,
            trigger,
            plan: AllocationPlan::new(
                generated_at,
                regime,
                weights,
                parse(scalar),
                parse(realized),
                warnings,
            ),
        })
    }
}
