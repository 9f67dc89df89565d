use crate::domain::{
    GroupStatus, LegSpec, LegStatus, PositionGroup, QueueStatus, QueuedSignal, TakeProfitMode,
    TradeSignal,
};
use crate::engine::admission::{decide, AdmissionDecision, AdmissionOutcome};
use crate::error::{GridError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info, instrument};

/// PostgreSQL storage adapter.
///
/// Every write path that can race — admission's check-then-act, the
/// monitor's leg flips, dequeue-on-close — runs inside a transaction
/// here. The partial unique index on (pair, timeframe, owner) where
/// status <> 'CLOSED' backstops the open-group invariant.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

/// A Filled leg joined up to its group, as the take-profit scan sees it
#[derive(Debug, Clone)]
pub struct FilledLegRow {
    pub leg_id: i64,
    pub group_id: i64,
    pub pair: String,
    pub take_profit_mode: TakeProfitMode,
    pub group_avg_entry: Option<Decimal>,
    pub fill_price: Decimal,
    pub tp_target: Decimal,
}

/// Snapshot row for risk selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPnl {
    pub group_id: i64,
    pub owner: String,
    pub pair: String,
    pub pnl_percent: Decimal,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ==================== Admission ====================

    /// Atomically admit a signal: attach a pyramid to the open group
    /// for its key, create a new Live group if the owner has capacity,
    /// or capture it as a queued signal.
    ///
    /// The whole check-then-act runs in one transaction under a
    /// per-owner advisory lock, so concurrent signals for one owner
    /// serialize and the Live-group count never exceeds the bound.
    #[instrument(skip(self, signal, ladder), fields(owner = %signal.owner, pair = %signal.pair))]
    pub async fn admit_signal(
        &self,
        signal: &TradeSignal,
        ladder: &[LegSpec],
        max_open_groups: u32,
        priority_rank: Option<i32>,
    ) -> Result<AdmissionOutcome> {
        let mut tx = self.pool.begin().await?;

        // Serialize admissions per owner; released on commit/rollback
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&signal.owner)
            .execute(&mut *tx)
            .await?;

        let open_rows = sqlx::query(
            r#"
            SELECT id FROM position_groups
            WHERE pair = $1 AND timeframe = $2 AND owner = $3 AND status <> 'CLOSED'
            "#,
        )
        .bind(&signal.pair)
        .bind(&signal.timeframe)
        .bind(&signal.owner)
        .fetch_all(&mut *tx)
        .await?;

        if open_rows.len() > 1 {
            return Err(GridError::InvariantViolation(format!(
                "{} non-Closed groups for ({}, {}, {})",
                open_rows.len(),
                signal.pair,
                signal.timeframe,
                signal.owner
            )));
        }

        let existing_group: Option<i64> = open_rows.first().map(|r| r.get("id"));

        let live_count: i64 = sqlx::query(
            r#"SELECT COUNT(*) AS count FROM position_groups WHERE owner = $1 AND status = 'LIVE'"#,
        )
        .bind(&signal.owner)
        .fetch_one(&mut *tx)
        .await?
        .get("count");

        let outcome = match decide(existing_group.is_some(), live_count, max_open_groups) {
            AdmissionDecision::Attach => {
                let group_id = existing_group.ok_or_else(|| {
                    GridError::Internal("attach decided without an open group".to_string())
                })?;
                let pyramid_id =
                    Self::insert_pyramid_with_legs(&mut tx, group_id, signal.entry_price, ladder)
                        .await?;
                AdmissionOutcome::Attached {
                    group_id,
                    pyramid_id,
                }
            }
            AdmissionDecision::Create => {
                let group_id: i64 = sqlx::query(
                    r#"
                    INSERT INTO position_groups (pair, timeframe, owner, status, take_profit_mode)
                    VALUES ($1, $2, $3, 'LIVE', $4)
                    RETURNING id
                    "#,
                )
                .bind(&signal.pair)
                .bind(&signal.timeframe)
                .bind(&signal.owner)
                .bind(TakeProfitMode::default().as_str())
                .fetch_one(&mut *tx)
                .await?
                .get("id");

                let pyramid_id =
                    Self::insert_pyramid_with_legs(&mut tx, group_id, signal.entry_price, ladder)
                        .await?;
                AdmissionOutcome::Created {
                    group_id,
                    pyramid_id,
                }
            }
            AdmissionDecision::Defer => {
                let signal_id: i64 = sqlx::query(
                    r#"
                    INSERT INTO queued_signals
                        (owner, pair, timeframe, entry_price, payload, status,
                         loss_percentage, expected_profit, replacement_count, priority_rank)
                    VALUES ($1, $2, $3, $4, $5, 'QUEUED', $6, $7, $8, $9)
                    RETURNING id
                    "#,
                )
                .bind(&signal.owner)
                .bind(&signal.pair)
                .bind(&signal.timeframe)
                .bind(signal.entry_price)
                .bind(&signal.payload)
                .bind(signal.loss_percentage)
                .bind(signal.expected_profit)
                .bind(signal.replacement_count)
                .bind(priority_rank)
                .fetch_one(&mut *tx)
                .await?
                .get("id");

                AdmissionOutcome::Queued { signal_id }
            }
        };

        tx.commit().await?;
        debug!("Admission outcome: {:?}", outcome);
        Ok(outcome)
    }

    /// Insert a pyramid and one Pending leg per ladder rung
    async fn insert_pyramid_with_legs(
        tx: &mut Transaction<'_, Postgres>,
        group_id: i64,
        entry_price: Decimal,
        ladder: &[LegSpec],
    ) -> Result<i64> {
        let pyramid_id: i64 = sqlx::query(
            r#"INSERT INTO pyramids (group_id, entry_price) VALUES ($1, $2) RETURNING id"#,
        )
        .bind(group_id)
        .bind(entry_price)
        .fetch_one(&mut **tx)
        .await?
        .get("id");

        for spec in ladder {
            sqlx::query(
                r#"
                INSERT INTO dca_legs
                    (pyramid_id, price_gap, capital_weight, tp_target, target_price, status)
                VALUES ($1, $2, $3, $4, $5, 'PENDING')
                "#,
            )
            .bind(pyramid_id)
            .bind(spec.price_gap)
            .bind(spec.capital_weight)
            .bind(spec.tp_target)
            .bind(spec.target_price(entry_price))
            .execute(&mut **tx)
            .await?;
        }

        Ok(pyramid_id)
    }

    // ==================== Legs ====================

    /// Record an externally reported fill. Only Pending legs accept a
    /// fill; anything else is an invalid transition. Returns the id of
    /// the owning group so the caller can recompute it.
    pub async fn mark_leg_filled(
        &self,
        leg_id: i64,
        fill_price: Decimal,
        filled_at: DateTime<Utc>,
        order_id: Option<&str>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            UPDATE dca_legs
            SET fill_price = $2, filled_at = $3, status = 'FILLED',
                order_id = COALESCE($4, order_id), updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            RETURNING pyramid_id
            "#,
        )
        .bind(leg_id)
        .bind(fill_price)
        .bind(filled_at)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        let pyramid_id: i64 = match row {
            Some(row) => row.get("pyramid_id"),
            None => return Err(self.leg_transition_error(leg_id, "FILLED").await),
        };

        self.group_id_for_pyramid(pyramid_id).await
    }

    /// Flip a Filled leg to HitTP. Returns false when the leg was not
    /// Filled anymore (already flipped by a previous cycle) — the
    /// caller treats that as a no-op.
    pub async fn mark_leg_hit_tp(&self, leg_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE dca_legs SET status = 'HIT_TP', updated_at = NOW()
            WHERE id = $1 AND status = 'FILLED'
            "#,
        )
        .bind(leg_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Administratively cancel a Pending or Filled leg. Returns the
    /// owning group id.
    pub async fn mark_leg_cancelled(&self, leg_id: i64) -> Result<i64> {
        let row = sqlx::query(
            r#"
            UPDATE dca_legs SET status = 'CANCELLED', updated_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'FILLED')
            RETURNING pyramid_id
            "#,
        )
        .bind(leg_id)
        .fetch_optional(&self.pool)
        .await?;

        let pyramid_id: i64 = match row {
            Some(row) => row.get("pyramid_id"),
            None => return Err(self.leg_transition_error(leg_id, "CANCELLED").await),
        };

        self.group_id_for_pyramid(pyramid_id).await
    }

    async fn leg_transition_error(&self, leg_id: i64, target: &str) -> GridError {
        let status = sqlx::query(r#"SELECT status FROM dca_legs WHERE id = $1"#)
            .bind(leg_id)
            .fetch_optional(&self.pool)
            .await;

        match status {
            Ok(Some(row)) => GridError::InvalidStateTransition {
                from: row.get::<String, _>("status"),
                to: target.to_string(),
            },
            Ok(None) => GridError::NotFound(format!("leg {}", leg_id)),
            Err(e) => e.into(),
        }
    }

    async fn group_id_for_pyramid(&self, pyramid_id: i64) -> Result<i64> {
        let row = sqlx::query(r#"SELECT group_id FROM pyramids WHERE id = $1"#)
            .bind(pyramid_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.get("group_id"))
            .ok_or_else(|| GridError::NotFound(format!("pyramid {}", pyramid_id)))
    }

    /// (fill_price, capital_weight) of every Filled leg across all of
    /// a group's pyramids; the input to the average-entry recompute
    pub async fn filled_leg_weights(&self, group_id: i64) -> Result<Vec<(Decimal, Decimal)>> {
        let rows = sqlx::query(
            r#"
            SELECT l.fill_price, l.capital_weight
            FROM dca_legs l
            INNER JOIN pyramids p ON p.id = l.pyramid_id
            WHERE p.group_id = $1 AND l.status = 'FILLED' AND l.fill_price IS NOT NULL
            ORDER BY l.id ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get("fill_price"), r.get("capital_weight")))
            .collect())
    }

    /// Status of every leg in a group, for the closure policy
    pub async fn leg_statuses_for_group(&self, group_id: i64) -> Result<Vec<LegStatus>> {
        let rows = sqlx::query(
            r#"
            SELECT l.status
            FROM dca_legs l
            INNER JOIN pyramids p ON p.id = l.pyramid_id
            WHERE p.group_id = $1
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                LegStatus::try_from(r.get::<String, _>("status").as_str())
                    .map_err(GridError::Internal)
            })
            .collect()
    }

    /// Every Filled leg of a Live group, joined with the pair and
    /// take-profit mode the monitor needs. Already-HitTP legs never
    /// appear here, which is what makes re-evaluation a no-op.
    pub async fn list_filled_legs(&self) -> Result<Vec<FilledLegRow>> {
        let rows = sqlx::query(
            r#"
            SELECT l.id AS leg_id, g.id AS group_id, g.pair, g.take_profit_mode,
                   g.avg_entry_price, l.fill_price, l.tp_target
            FROM dca_legs l
            INNER JOIN pyramids p ON p.id = l.pyramid_id
            INNER JOIN position_groups g ON g.id = p.group_id
            WHERE l.status = 'FILLED' AND l.fill_price IS NOT NULL AND g.status = 'LIVE'
            ORDER BY g.pair, l.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(FilledLegRow {
                    leg_id: r.get("leg_id"),
                    group_id: r.get("group_id"),
                    pair: r.get("pair"),
                    take_profit_mode: TakeProfitMode::try_from(
                        r.get::<String, _>("take_profit_mode").as_str(),
                    )
                    .map_err(GridError::Internal)?,
                    group_avg_entry: r.get("avg_entry_price"),
                    fill_price: r.get("fill_price"),
                    tp_target: r.get("tp_target"),
                })
            })
            .collect()
    }

    // ==================== Groups ====================

    /// Fetch a group by id
    pub async fn get_group(&self, group_id: i64) -> Result<Option<PositionGroup>> {
        let row = sqlx::query(
            r#"
            SELECT id, pair, timeframe, owner, status, take_profit_mode,
                   avg_entry_price, unrealized_pnl_percent, unrealized_pnl_usd,
                   notional_usd, created_at, updated_at
            FROM position_groups WHERE id = $1
            "#,
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::map_group).transpose()
    }

    /// All Live groups, oldest first
    pub async fn list_live_groups(&self) -> Result<Vec<PositionGroup>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pair, timeframe, owner, status, take_profit_mode,
                   avg_entry_price, unrealized_pnl_percent, unrealized_pnl_usd,
                   notional_usd, created_at, updated_at
            FROM position_groups
            WHERE status = 'LIVE'
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::map_group).collect()
    }

    /// Non-Closed groups, optionally filtered by owner (status CLI)
    pub async fn list_open_groups(&self, owner: Option<&str>) -> Result<Vec<PositionGroup>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pair, timeframe, owner, status, take_profit_mode,
                   avg_entry_price, unrealized_pnl_percent, unrealized_pnl_usd,
                   notional_usd, created_at, updated_at
            FROM position_groups
            WHERE status <> 'CLOSED' AND ($1::TEXT IS NULL OR owner = $1)
            ORDER BY id ASC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::map_group).collect()
    }

    fn map_group(row: sqlx::postgres::PgRow) -> Result<PositionGroup> {
        Ok(PositionGroup {
            id: Some(row.get("id")),
            pair: row.get("pair"),
            timeframe: row.get("timeframe"),
            owner: row.get("owner"),
            status: GroupStatus::try_from(row.get::<String, _>("status").as_str())
                .map_err(GridError::Internal)?,
            take_profit_mode: TakeProfitMode::try_from(
                row.get::<String, _>("take_profit_mode").as_str(),
            )
            .map_err(GridError::Internal)?,
            avg_entry_price: row.get("avg_entry_price"),
            unrealized_pnl_percent: row.get("unrealized_pnl_percent"),
            unrealized_pnl_usd: row.get("unrealized_pnl_usd"),
            notional_usd: row.get("notional_usd"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Persist a recomputed valuation. Writing the same values twice
    /// is harmless; the recompute is idempotent end to end.
    pub async fn update_group_valuation(
        &self,
        group_id: i64,
        avg_entry_price: Option<Decimal>,
        pnl_percent: Option<Decimal>,
        pnl_usd: Option<Decimal>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE position_groups
            SET avg_entry_price = $2, unrealized_pnl_percent = $3,
                unrealized_pnl_usd = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(group_id)
        .bind(avg_entry_price)
        .bind(pnl_percent)
        .bind(pnl_usd)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Closure + queue ====================

    /// Transition a group to Closed and dequeue the owner's next
    /// queued signal in the same transaction, so a close triggers at
    /// most one replay and never leaks a slot.
    ///
    /// Returns None when the group was already Closed (someone else
    /// won the transition) or when the owner's queue is empty.
    #[instrument(skip(self))]
    pub async fn close_group_and_dequeue(&self, group_id: i64) -> Result<Option<QueuedSignal>> {
        let mut tx = self.pool.begin().await?;

        // The status guard makes the Closed transition happen exactly
        // once; a second caller sees zero rows and triggers no replay.
        let closed = sqlx::query(
            r#"
            UPDATE position_groups SET status = 'CLOSED', updated_at = NOW()
            WHERE id = $1 AND status <> 'CLOSED'
            RETURNING owner
            "#,
        )
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await?;

        let owner: String = match closed {
            Some(row) => row.get("owner"),
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        let next = sqlx::query(
            r#"
            SELECT id, owner, pair, timeframe, entry_price, payload, status,
                   loss_percentage, expected_profit, replacement_count, priority_rank,
                   enqueued_at
            FROM queued_signals
            WHERE owner = $1 AND status = 'QUEUED'
            ORDER BY priority_rank ASC NULLS LAST, enqueued_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(&owner)
        .fetch_optional(&mut *tx)
        .await?;

        let queued = match next {
            Some(row) => {
                let signal = Self::map_queued(&row)?;
                sqlx::query(r#"UPDATE queued_signals SET status = 'PROCESSED' WHERE id = $1"#)
                    .bind(signal.id)
                    .execute(&mut *tx)
                    .await?;
                Some(signal)
            }
            None => None,
        };

        tx.commit().await?;
        info!(
            "Group {} closed; dequeued signal: {:?}",
            group_id,
            queued.as_ref().and_then(|q| q.id)
        );
        Ok(queued)
    }

    /// An owner's queued signals in replay order
    pub async fn list_queued_signals(&self, owner: &str) -> Result<Vec<QueuedSignal>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, pair, timeframe, entry_price, payload, status,
                   loss_percentage, expected_profit, replacement_count, priority_rank,
                   enqueued_at
            FROM queued_signals
            WHERE owner = $1 AND status = 'QUEUED'
            ORDER BY priority_rank ASC NULLS LAST, enqueued_at ASC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_queued).collect()
    }

    /// Administratively withdraw a queued signal
    pub async fn cancel_queued_signal(&self, signal_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE queued_signals SET status = 'CANCELLED' WHERE id = $1 AND status = 'QUEUED'"#,
        )
        .bind(signal_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    fn map_queued(row: &sqlx::postgres::PgRow) -> Result<QueuedSignal> {
        Ok(QueuedSignal {
            id: Some(row.get("id")),
            owner: row.get("owner"),
            pair: row.get("pair"),
            timeframe: row.get("timeframe"),
            entry_price: row.get("entry_price"),
            payload: row.get("payload"),
            status: QueueStatus::try_from(row.get::<String, _>("status").as_str())
                .map_err(GridError::Internal)?,
            loss_percentage: row.get("loss_percentage"),
            expected_profit: row.get("expected_profit"),
            replacement_count: row.get("replacement_count"),
            priority_rank: row.get("priority_rank"),
            enqueued_at: row.get("enqueued_at"),
        })
    }

    // ==================== Risk ====================

    /// PnL snapshot of every Live group that has a computed PnL,
    /// ordered by id for reproducible selection
    pub async fn list_live_group_pnls(&self) -> Result<Vec<GroupPnl>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, pair, unrealized_pnl_percent
            FROM position_groups
            WHERE status = 'LIVE' AND unrealized_pnl_percent IS NOT NULL
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| GroupPnl {
                group_id: r.get("id"),
                owner: r.get("owner"),
                pair: r.get("pair"),
                pnl_percent: r.get("unrealized_pnl_percent"),
            })
            .collect())
    }

    /// Record that the risk engine selected a group for an offset.
    /// The offsetting trade itself is executed externally.
    pub async fn record_risk_selection(
        &self,
        group_id: i64,
        pnl_percent: Decimal,
        threshold_percent: Decimal,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO risk_events (group_id, pnl_percent, threshold_percent)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(group_id)
        .bind(pnl_percent)
        .bind(threshold_percent)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }
}
