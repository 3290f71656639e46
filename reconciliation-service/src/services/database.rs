//! Postgres store for reconciliation-service.

use super::metrics::DB_QUERY_DURATION;
use super::store::{batch_lock_set, check_members, ListQuery, ReconStore};
use crate::error::ReconError;
use crate::models::{
    AdjustmentSide, BankTransaction, BankTransactionState, BookTransaction, BookTransactionState,
    ConfigScope, FilterStack, ImportOutcome, Match, MatchDraft, MatchHistoryEntry, MatchMethod,
    MatchParams, NewBankTransaction, NewBookTransaction, ReconConfig, ReconConfigDraft,
    ReconciliationTask, ScoreWeights, TaskOutcome, TaskProgress, TaskStatus, TaskSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const BANK_COLUMNS: &str = "id, tenant_id, bank_account_id, entity_id, date, amount, description, \
                            currency_id, raw_hash, state, created_at";
const BOOK_COLUMNS: &str = "id, tenant_id, transaction_id, account_id, entity_id, date, amount, \
                            description, currency_id, cost_center_id, state, reconciled, created_at";
const CONFIG_COLUMNS: &str = "id, tenant_id, name, scope, company_id, user_id, bank_filters, \
                              book_filters, max_group_size_bank, max_group_size_book, \
                              amount_tolerance, date_tolerance_days, group_date_span_days, \
                              min_confidence, max_suggestions, date_weight, amount_weight, \
                              currency_weight, embedding_weight, allow_mixed_signs, \
                              allow_mixed_currencies, is_default, created_at, updated_at";
const TASK_COLUMNS: &str = "id, tenant_id, created_by, config_id, config_name, status, params, \
                            bank_candidate_ids, book_candidate_ids, summary, targets_total, \
                            targets_processed, error_message, soft_time_limit_seconds, \
                            created_at, started_at, finished_at, updated_at";
const MATCH_COLUMNS: &str = "id, tenant_id, bank_transaction_ids, book_transaction_ids, \
                             adjustment_side, reference, notes, method, confidence_score, \
                             task_id, active, created_at, created_by, unmatched_at";

const UNIQUE_VIOLATION: &str = "23505";

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> ReconError {
    move |e| ReconError::Store(anyhow::anyhow!("{}: {}", context, e))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|c| c == UNIQUE_VIOLATION)
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(FromRow)]
struct BankRow {
    id: Uuid,
    tenant_id: Uuid,
    bank_account_id: Uuid,
    entity_id: Option<Uuid>,
    date: NaiveDate,
    amount: i64,
    description: String,
    currency_id: String,
    raw_hash: String,
    state: String,
    created_at: DateTime<Utc>,
}

impl From<BankRow> for BankTransaction {
    fn from(r: BankRow) -> Self {
        Self {
            id: r.id,
            tenant_id: r.tenant_id,
            bank_account_id: r.bank_account_id,
            entity_id: r.entity_id,
            date: r.date,
            amount: r.amount,
            description: r.description,
            currency_id: r.currency_id,
            raw_hash: r.raw_hash,
            state: BankTransactionState::from_str(&r.state),
            created_at: r.created_at,
        }
    }
}

#[derive(FromRow)]
struct BookRow {
    id: Uuid,
    tenant_id: Uuid,
    transaction_id: Option<Uuid>,
    account_id: Uuid,
    entity_id: Option<Uuid>,
    date: NaiveDate,
    amount: i64,
    description: String,
    currency_id: String,
    cost_center_id: Option<Uuid>,
    state: String,
    reconciled: bool,
    created_at: DateTime<Utc>,
}

impl From<BookRow> for BookTransaction {
    fn from(r: BookRow) -> Self {
        Self {
            id: r.id,
            tenant_id: r.tenant_id,
            transaction_id: r.transaction_id,
            account_id: r.account_id,
            entity_id: r.entity_id,
            date: r.date,
            amount: r.amount,
            description: r.description,
            currency_id: r.currency_id,
            cost_center_id: r.cost_center_id,
            state: BookTransactionState::from_str(&r.state),
            reconciled: r.reconciled,
            created_at: r.created_at,
        }
    }
}

#[derive(FromRow)]
struct ConfigRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    scope: String,
    company_id: Option<Uuid>,
    user_id: Option<String>,
    bank_filters: Json<FilterStack>,
    book_filters: Json<FilterStack>,
    max_group_size_bank: i32,
    max_group_size_book: i32,
    amount_tolerance: i64,
    date_tolerance_days: i64,
    group_date_span_days: i64,
    min_confidence: f64,
    max_suggestions: i32,
    date_weight: f64,
    amount_weight: f64,
    currency_weight: f64,
    embedding_weight: f64,
    allow_mixed_signs: bool,
    allow_mixed_currencies: bool,
    is_default: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConfigRow> for ReconConfig {
    fn from(r: ConfigRow) -> Self {
        Self {
            id: r.id,
            tenant_id: r.tenant_id,
            name: r.name,
            scope: ConfigScope::from_str(&r.scope),
            company_id: r.company_id,
            user_id: r.user_id,
            bank_filters: r.bank_filters.0,
            book_filters: r.book_filters.0,
            max_group_size_bank: r.max_group_size_bank.max(0) as usize,
            max_group_size_book: r.max_group_size_book.max(0) as usize,
            amount_tolerance: r.amount_tolerance,
            date_tolerance_days: r.date_tolerance_days,
            group_date_span_days: r.group_date_span_days,
            min_confidence: r.min_confidence,
            max_suggestions: r.max_suggestions.max(0) as usize,
            weights: ScoreWeights {
                date_weight: r.date_weight,
                amount_weight: r.amount_weight,
                currency_weight: r.currency_weight,
                embedding_weight: r.embedding_weight,
            },
            allow_mixed_signs: r.allow_mixed_signs,
            allow_mixed_currencies: r.allow_mixed_currencies,
            is_default: r.is_default,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    tenant_id: Uuid,
    created_by: String,
    config_id: Option<Uuid>,
    config_name: Option<String>,
    status: String,
    params: Json<MatchParams>,
    bank_candidate_ids: Vec<Uuid>,
    book_candidate_ids: Vec<Uuid>,
    summary: Option<Json<TaskSummary>>,
    targets_total: i64,
    targets_processed: i64,
    error_message: Option<String>,
    soft_time_limit_seconds: i64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<TaskRow> for ReconciliationTask {
    fn from(r: TaskRow) -> Self {
        Self {
            id: r.id,
            tenant_id: r.tenant_id,
            created_by: r.created_by,
            config_id: r.config_id,
            config_name: r.config_name,
            status: TaskStatus::from_str(&r.status),
            params: r.params.0,
            bank_candidate_ids: r.bank_candidate_ids,
            book_candidate_ids: r.book_candidate_ids,
            created_at: r.created_at,
            started_at: r.started_at,
            finished_at: r.finished_at,
            updated_at: r.updated_at,
            summary: r.summary.map(|s| s.0),
            progress: TaskProgress {
                targets_total: r.targets_total.max(0) as u64,
                targets_processed: r.targets_processed.max(0) as u64,
            },
            error_message: r.error_message,
            soft_time_limit_seconds: r.soft_time_limit_seconds.max(0) as u64,
        }
    }
}

#[derive(FromRow)]
struct MatchRow {
    id: Uuid,
    tenant_id: Uuid,
    bank_transaction_ids: Vec<Uuid>,
    book_transaction_ids: Vec<Uuid>,
    adjustment_side: String,
    reference: Option<String>,
    notes: Option<String>,
    method: String,
    confidence_score: Option<f64>,
    task_id: Option<Uuid>,
    active: bool,
    created_at: DateTime<Utc>,
    created_by: String,
    unmatched_at: Option<DateTime<Utc>>,
}

impl From<MatchRow> for Match {
    fn from(r: MatchRow) -> Self {
        Self {
            id: r.id,
            tenant_id: r.tenant_id,
            bank_transaction_ids: r.bank_transaction_ids,
            book_transaction_ids: r.book_transaction_ids,
            adjustment_side: AdjustmentSide::from_str(&r.adjustment_side),
            reference: r.reference,
            notes: r.notes,
            method: MatchMethod::from_str(&r.method),
            confidence_score: r.confidence_score,
            task_id: r.task_id,
            active: r.active,
            created_at: r.created_at,
            created_by: r.created_by,
            unmatched_at: r.unmatched_at,
        }
    }
}

#[derive(FromRow)]
struct HistoryRow {
    match_id: Uuid,
    bank_description: String,
    ledger_account_id: Uuid,
    counterpart_account_id: Option<Uuid>,
    cost_center_id: Option<Uuid>,
}

impl From<HistoryRow> for MatchHistoryEntry {
    fn from(r: HistoryRow) -> Self {
        Self {
            match_id: r.match_id,
            bank_description: r.bank_description,
            ledger_account_id: r.ledger_account_id,
            counterpart_account_id: r.counterpart_account_id,
            cost_center_id: r.cost_center_id,
        }
    }
}

// ============================================================================
// Database
// ============================================================================

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "reconciliation-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn insert_book_line(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        line: NewBookTransaction,
    ) -> Result<BookTransaction, ReconError> {
        let row = sqlx::query_as::<_, BookRow>(&format!(
            r#"
            INSERT INTO book_transactions (id, tenant_id, transaction_id, account_id, entity_id, date,
                                           amount, description, currency_id, cost_center_id, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            BOOK_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(line.transaction_id)
        .bind(line.account_id)
        .bind(line.entity_id)
        .bind(line.date)
        .bind(line.amount)
        .bind(line.description)
        .bind(line.currency_id)
        .bind(line.cost_center_id)
        .bind(line.state.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(db_err("Failed to insert book transaction"))?;
        Ok(row.into())
    }

    /// Clears the default flag on other configs in the same (scope, company, user) slot.
    async fn clear_default_slot(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        draft: &ReconConfigDraft,
        keep: Option<Uuid>,
    ) -> Result<(), ReconError> {
        sqlx::query(
            r#"
            UPDATE recon_configs
            SET is_default = FALSE, updated_at = NOW()
            WHERE tenant_id = $1 AND scope = $2
              AND company_id IS NOT DISTINCT FROM $3
              AND user_id IS NOT DISTINCT FROM $4
              AND ($5::uuid IS NULL OR id <> $5)
              AND is_default
            "#,
        )
        .bind(tenant_id)
        .bind(draft.scope.as_str())
        .bind(draft.company_id)
        .bind(draft.user_id.as_deref())
        .bind(keep)
        .execute(&mut **tx)
        .await
        .map_err(db_err("Failed to clear default config"))?;
        Ok(())
    }
}

#[async_trait]
impl ReconStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err("Health check failed"))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    #[instrument(skip(self, transactions), fields(tenant_id = %tenant_id, count = transactions.len()))]
    async fn insert_bank_transactions(
        &self,
        tenant_id: Uuid,
        transactions: Vec<NewBankTransaction>,
    ) -> Result<ImportOutcome, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_bank_transactions"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin"))?;
        let sql = format!(
            r#"
            INSERT INTO bank_transactions (id, tenant_id, bank_account_id, entity_id, date, amount,
                                           description, currency_id, raw_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (tenant_id, raw_hash) DO NOTHING
            RETURNING {}
            "#,
            BANK_COLUMNS
        );

        let mut outcome = ImportOutcome {
            inserted: Vec::new(),
            duplicates: Vec::new(),
        };
        for t in transactions {
            let row = sqlx::query_as::<_, BankRow>(&sql)
                .bind(Uuid::new_v4())
                .bind(tenant_id)
                .bind(t.bank_account_id)
                .bind(t.entity_id)
                .bind(t.date)
                .bind(t.amount)
                .bind(&t.description)
                .bind(&t.currency_id)
                .bind(&t.raw_hash)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err("Failed to insert bank transaction"))?;
            match row {
                Some(r) => outcome.inserted.push(r.into()),
                None => outcome.duplicates.push(t.raw_hash),
            }
        }
        tx.commit().await.map_err(db_err("Failed to commit import"))?;

        timer.observe_duration();
        info!(
            inserted = outcome.inserted.len(),
            duplicates = outcome.duplicates.len(),
            "Bank transactions imported"
        );
        Ok(outcome)
    }

    #[instrument(skip(self, transactions), fields(tenant_id = %tenant_id, count = transactions.len()))]
    async fn insert_book_transactions(
        &self,
        tenant_id: Uuid,
        transactions: Vec<NewBookTransaction>,
    ) -> Result<Vec<BookTransaction>, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_book_transactions"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin"))?;
        let mut inserted = Vec::with_capacity(transactions.len());
        for t in transactions {
            inserted.push(Self::insert_book_line(&mut tx, tenant_id, t).await?);
        }
        tx.commit().await.map_err(db_err("Failed to commit book import"))?;

        timer.observe_duration();
        Ok(inserted)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn list_bank_transactions(
        &self,
        tenant_id: Uuid,
        state: Option<BankTransactionState>,
        query: ListQuery,
    ) -> Result<Vec<BankTransaction>, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_bank_transactions"])
            .start_timer();

        let rows = sqlx::query_as::<_, BankRow>(&format!(
            r#"
            SELECT {}
            FROM bank_transactions
            WHERE tenant_id = $1 AND ($2::text IS NULL OR state = $2)
            ORDER BY date, id
            LIMIT $3
            "#,
            BANK_COLUMNS
        ))
        .bind(tenant_id)
        .bind(state.map(|s| s.as_str()))
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list bank transactions"))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn list_book_transactions(
        &self,
        tenant_id: Uuid,
        open_only: bool,
        query: ListQuery,
    ) -> Result<Vec<BookTransaction>, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_book_transactions"])
            .start_timer();

        let rows = sqlx::query_as::<_, BookRow>(&format!(
            r#"
            SELECT {}
            FROM book_transactions
            WHERE tenant_id = $1 AND (NOT $2 OR (state = 'posted' AND NOT reconciled))
            ORDER BY date, id
            LIMIT $3
            "#,
            BOOK_COLUMNS
        ))
        .bind(tenant_id)
        .bind(open_only)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list book transactions"))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, ids), fields(tenant_id = %tenant_id, count = ids.len()))]
    async fn get_bank_transactions(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<BankTransaction>, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_bank_transactions"])
            .start_timer();

        let rows = sqlx::query_as::<_, BankRow>(&format!(
            "SELECT {} FROM bank_transactions WHERE tenant_id = $1 AND id = ANY($2) ORDER BY date, id",
            BANK_COLUMNS
        ))
        .bind(tenant_id)
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to get bank transactions"))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, ids), fields(tenant_id = %tenant_id, count = ids.len()))]
    async fn get_book_transactions(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<BookTransaction>, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_book_transactions"])
            .start_timer();

        let rows = sqlx::query_as::<_, BookRow>(&format!(
            "SELECT {} FROM book_transactions WHERE tenant_id = $1 AND id = ANY($2) ORDER BY date, id",
            BOOK_COLUMNS
        ))
        .bind(tenant_id)
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to get book transactions"))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn unmatched_bank_pool(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<BankTransaction>, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["unmatched_bank_pool"])
            .start_timer();

        let rows = sqlx::query_as::<_, BankRow>(&format!(
            "SELECT {} FROM bank_transactions WHERE tenant_id = $1 AND state = 'unmatched' ORDER BY date, id",
            BANK_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load bank pool"))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn open_book_pool(&self, tenant_id: Uuid) -> Result<Vec<BookTransaction>, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["open_book_pool"])
            .start_timer();

        let rows = sqlx::query_as::<_, BookRow>(&format!(
            r#"
            SELECT {}
            FROM book_transactions
            WHERE tenant_id = $1 AND state = 'posted' AND NOT reconciled
            ORDER BY date, id
            "#,
            BOOK_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load book pool"))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, bank_transaction_id = %id))]
    async fn set_bank_ignored(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        ignored: bool,
    ) -> Result<BankTransaction, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_bank_ignored"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin"))?;
        let current: Option<String> = sqlx::query_scalar(
            "SELECT state FROM bank_transactions WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to lock bank transaction"))?;

        let current = current.ok_or_else(|| ReconError::not_found("bank transaction", id))?;
        if BankTransactionState::from_str(&current) == BankTransactionState::Matched {
            return Err(ReconError::AlreadyMatched {
                bank_ids: vec![id],
                book_ids: Vec::new(),
            });
        }

        let next = if ignored {
            BankTransactionState::Ignored
        } else {
            BankTransactionState::Unmatched
        };
        let row = sqlx::query_as::<_, BankRow>(&format!(
            "UPDATE bank_transactions SET state = $3 WHERE tenant_id = $1 AND id = $2 RETURNING {}",
            BANK_COLUMNS
        ))
        .bind(tenant_id)
        .bind(id)
        .bind(next.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("Failed to update bank transaction"))?;
        tx.commit().await.map_err(db_err("Failed to commit"))?;

        timer.observe_duration();
        Ok(row.into())
    }

    // =========================================================================
    // Recon Config Operations
    // =========================================================================

    #[instrument(skip(self, draft), fields(tenant_id = %tenant_id))]
    async fn create_config(
        &self,
        tenant_id: Uuid,
        draft: ReconConfigDraft,
    ) -> Result<ReconConfig, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_config"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin"))?;
        if draft.is_default {
            Self::clear_default_slot(&mut tx, tenant_id, &draft, None).await?;
        }

        let row = sqlx::query_as::<_, ConfigRow>(&format!(
            r#"
            INSERT INTO recon_configs (id, tenant_id, name, scope, company_id, user_id, bank_filters,
                                       book_filters, max_group_size_bank, max_group_size_book,
                                       amount_tolerance, date_tolerance_days, group_date_span_days,
                                       min_confidence, max_suggestions, date_weight, amount_weight,
                                       currency_weight, embedding_weight, allow_mixed_signs,
                                       allow_mixed_currencies, is_default)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22)
            RETURNING {}
            "#,
            CONFIG_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&draft.name)
        .bind(draft.scope.as_str())
        .bind(draft.company_id)
        .bind(draft.user_id.as_deref())
        .bind(Json(&draft.bank_filters))
        .bind(Json(&draft.book_filters))
        .bind(draft.max_group_size_bank as i32)
        .bind(draft.max_group_size_book as i32)
        .bind(draft.amount_tolerance)
        .bind(draft.date_tolerance_days)
        .bind(draft.group_date_span_days)
        .bind(draft.min_confidence)
        .bind(draft.max_suggestions as i32)
        .bind(draft.weights.date_weight)
        .bind(draft.weights.amount_weight)
        .bind(draft.weights.currency_weight)
        .bind(draft.weights.embedding_weight)
        .bind(draft.allow_mixed_signs)
        .bind(draft.allow_mixed_currencies)
        .bind(draft.is_default)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("Failed to create recon config"))?;
        tx.commit().await.map_err(db_err("Failed to commit"))?;

        timer.observe_duration();
        info!(config_id = %row.id, "Recon config created");
        Ok(row.into())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, config_id = %id))]
    async fn get_config(&self, tenant_id: Uuid, id: Uuid) -> Result<ReconConfig, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_config"])
            .start_timer();

        let row = sqlx::query_as::<_, ConfigRow>(&format!(
            "SELECT {} FROM recon_configs WHERE tenant_id = $1 AND id = $2",
            CONFIG_COLUMNS
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get recon config"))?;

        timer.observe_duration();
        row.map(Into::into)
            .ok_or_else(|| ReconError::not_found("recon config", id))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn list_configs(&self, tenant_id: Uuid) -> Result<Vec<ReconConfig>, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_configs"])
            .start_timer();

        let rows = sqlx::query_as::<_, ConfigRow>(&format!(
            "SELECT {} FROM recon_configs WHERE tenant_id = $1 ORDER BY name, id",
            CONFIG_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list recon configs"))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, draft), fields(tenant_id = %tenant_id, config_id = %id))]
    async fn update_config(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        draft: ReconConfigDraft,
    ) -> Result<ReconConfig, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_config"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin"))?;
        if draft.is_default {
            Self::clear_default_slot(&mut tx, tenant_id, &draft, Some(id)).await?;
        }

        let row = sqlx::query_as::<_, ConfigRow>(&format!(
            r#"
            UPDATE recon_configs
            SET name = $3, scope = $4, company_id = $5, user_id = $6, bank_filters = $7,
                book_filters = $8, max_group_size_bank = $9, max_group_size_book = $10,
                amount_tolerance = $11, date_tolerance_days = $12, group_date_span_days = $13,
                min_confidence = $14, max_suggestions = $15, date_weight = $16,
                amount_weight = $17, currency_weight = $18, embedding_weight = $19,
                allow_mixed_signs = $20, allow_mixed_currencies = $21, is_default = $22,
                updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING {}
            "#,
            CONFIG_COLUMNS
        ))
        .bind(tenant_id)
        .bind(id)
        .bind(&draft.name)
        .bind(draft.scope.as_str())
        .bind(draft.company_id)
        .bind(draft.user_id.as_deref())
        .bind(Json(&draft.bank_filters))
        .bind(Json(&draft.book_filters))
        .bind(draft.max_group_size_bank as i32)
        .bind(draft.max_group_size_book as i32)
        .bind(draft.amount_tolerance)
        .bind(draft.date_tolerance_days)
        .bind(draft.group_date_span_days)
        .bind(draft.min_confidence)
        .bind(draft.max_suggestions as i32)
        .bind(draft.weights.date_weight)
        .bind(draft.weights.amount_weight)
        .bind(draft.weights.currency_weight)
        .bind(draft.weights.embedding_weight)
        .bind(draft.allow_mixed_signs)
        .bind(draft.allow_mixed_currencies)
        .bind(draft.is_default)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to update recon config"))?;

        let row = row.ok_or_else(|| ReconError::not_found("recon config", id))?;
        tx.commit().await.map_err(db_err("Failed to commit"))?;

        timer.observe_duration();
        Ok(row.into())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, config_id = %id))]
    async fn delete_config(&self, tenant_id: Uuid, id: Uuid) -> Result<(), ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_config"])
            .start_timer();

        let result = sqlx::query("DELETE FROM recon_configs WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("Failed to delete recon config"))?;

        timer.observe_duration();
        if result.rows_affected() == 0 {
            return Err(ReconError::not_found("recon config", id));
        }
        Ok(())
    }

    // =========================================================================
    // Task Operations
    // =========================================================================

    #[instrument(skip(self, task), fields(tenant_id = %task.tenant_id, task_id = %task.id))]
    async fn create_task(&self, task: ReconciliationTask) -> Result<ReconciliationTask, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_task"])
            .start_timer();

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            INSERT INTO reconciliation_tasks (id, tenant_id, created_by, config_id, config_name,
                                              status, params, bank_candidate_ids,
                                              book_candidate_ids, targets_total,
                                              soft_time_limit_seconds, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(task.id)
        .bind(task.tenant_id)
        .bind(&task.created_by)
        .bind(task.config_id)
        .bind(task.config_name.as_deref())
        .bind(task.status.as_str())
        .bind(Json(&task.params))
        .bind(&task.bank_candidate_ids)
        .bind(&task.book_candidate_ids)
        .bind(task.progress.targets_total as i64)
        .bind(task.soft_time_limit_seconds as i64)
        .bind(task.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Failed to create task"))?;

        timer.observe_duration();
        Ok(row.into())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, task_id = %id))]
    async fn get_task(&self, tenant_id: Uuid, id: Uuid) -> Result<ReconciliationTask, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_task"])
            .start_timer();

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM reconciliation_tasks WHERE tenant_id = $1 AND id = $2",
            TASK_COLUMNS
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get task"))?;

        timer.observe_duration();
        row.map(Into::into)
            .ok_or_else(|| ReconError::not_found("task", id))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn list_tasks(
        &self,
        tenant_id: Uuid,
        status: Option<TaskStatus>,
        query: ListQuery,
    ) -> Result<Vec<ReconciliationTask>, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_tasks"])
            .start_timer();

        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {}
            FROM reconciliation_tasks
            WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
            TASK_COLUMNS
        ))
        .bind(tenant_id)
        .bind(status.map(|s| s.as_str()))
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list tasks"))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn tasks_in_status(
        &self,
        status: TaskStatus,
    ) -> Result<Vec<ReconciliationTask>, ReconError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM reconciliation_tasks WHERE status = $1 ORDER BY created_at",
            TASK_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load tasks by status"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, outcome), fields(tenant_id = %tenant_id, task_id = %id, to = %to))]
    async fn transition_task(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        to: TaskStatus,
        outcome: TaskOutcome,
    ) -> Result<ReconciliationTask, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["transition_task"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin"))?;
        let current: Option<String> = sqlx::query_scalar(
            "SELECT status FROM reconciliation_tasks WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to lock task"))?;

        let from = TaskStatus::from_str(&current.ok_or_else(|| ReconError::not_found("task", id))?);
        if !from.can_transition_to(to) {
            return Err(ReconError::InvalidTransition { from, to });
        }

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE reconciliation_tasks
            SET status = $3,
                updated_at = NOW(),
                started_at = CASE WHEN $3 = 'running' THEN NOW() ELSE started_at END,
                finished_at = CASE WHEN $4 THEN NOW() ELSE finished_at END,
                summary = COALESCE($5, summary),
                error_message = COALESCE($6, error_message)
            WHERE tenant_id = $1 AND id = $2
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(tenant_id)
        .bind(id)
        .bind(to.as_str())
        .bind(to.is_terminal())
        .bind(outcome.summary.map(Json))
        .bind(outcome.error_message)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("Failed to update task status"))?;
        tx.commit().await.map_err(db_err("Failed to commit"))?;

        timer.observe_duration();
        Ok(row.into())
    }

    async fn update_task_progress(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        progress: TaskProgress,
    ) -> Result<(), ReconError> {
        sqlx::query(
            r#"
            UPDATE reconciliation_tasks
            SET targets_total = $3, targets_processed = $4, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(progress.targets_total as i64)
        .bind(progress.targets_processed as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to update task progress"))?;
        Ok(())
    }

    // =========================================================================
    // Match Operations
    // =========================================================================

    #[instrument(skip(self, drafts), fields(tenant_id = %tenant_id, batch = drafts.len()))]
    async fn commit_matches(
        &self,
        tenant_id: Uuid,
        created_by: &str,
        drafts: Vec<MatchDraft>,
    ) -> Result<Vec<Match>, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_matches"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin"))?;

        for draft in &drafts {
            if draft.bank_transaction_ids.is_empty() {
                return Err(ReconError::EmptySet("bank"));
            }
            if draft.book_member_count() == 0 {
                return Err(ReconError::EmptySet("book"));
            }
        }

        // Lock every row of the batch once, in id order.
        let (bank_ids, book_ids) = batch_lock_set(&drafts);
        let locked_bank: HashMap<Uuid, BankTransaction> = sqlx::query_as::<_, BankRow>(&format!(
            "SELECT {} FROM bank_transactions WHERE tenant_id = $1 AND id = ANY($2) ORDER BY id FOR UPDATE",
            BANK_COLUMNS
        ))
        .bind(tenant_id)
        .bind(&bank_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err("Failed to lock bank transactions"))?
        .into_iter()
        .map(|row| {
            let t = BankTransaction::from(row);
            (t.id, t)
        })
        .collect();

        let locked_book: HashMap<Uuid, BookTransaction> = sqlx::query_as::<_, BookRow>(&format!(
            "SELECT {} FROM book_transactions WHERE tenant_id = $1 AND id = ANY($2) ORDER BY id FOR UPDATE",
            BOOK_COLUMNS
        ))
        .bind(tenant_id)
        .bind(&book_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err("Failed to lock book transactions"))?
        .into_iter()
        .map(|row| {
            let t = BookTransaction::from(row);
            (t.id, t)
        })
        .collect();

        let mut conflict_bank = Vec::new();
        let mut conflict_book = Vec::new();
        let mut batch_bank = HashSet::new();
        let mut batch_book = HashSet::new();

        for draft in &drafts {
            let bank: Vec<BankTransaction> = draft
                .bank_transaction_ids
                .iter()
                .filter_map(|id| locked_bank.get(id).cloned())
                .collect();
            let book: Vec<BookTransaction> = draft
                .book_transaction_ids
                .iter()
                .filter_map(|id| locked_book.get(id).cloned())
                .collect();

            check_members(draft, &bank, &book)?;

            for t in &bank {
                if t.state == BankTransactionState::Matched || !batch_bank.insert(t.id) {
                    conflict_bank.push(t.id);
                }
            }
            for t in &book {
                if t.reconciled || !batch_book.insert(t.id) {
                    conflict_book.push(t.id);
                }
            }
        }

        if !conflict_bank.is_empty() || !conflict_book.is_empty() {
            return Err(ReconError::AlreadyMatched {
                bank_ids: conflict_bank,
                book_ids: conflict_book,
            });
        }

        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let mut book_ids = draft.book_transaction_ids.clone();
            for line in draft.new_book_lines {
                let reconciles = line.reconciles_bank;
                let posted = Self::insert_book_line(&mut tx, tenant_id, line.line).await?;
                if reconciles {
                    book_ids.push(posted.id);
                }
            }

            let row = sqlx::query_as::<_, MatchRow>(&format!(
                r#"
                INSERT INTO matches (id, tenant_id, bank_transaction_ids, book_transaction_ids,
                                     adjustment_side, reference, notes, method, confidence_score,
                                     task_id, created_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING {}
                "#,
                MATCH_COLUMNS
            ))
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(&draft.bank_transaction_ids)
            .bind(&book_ids)
            .bind(draft.adjustment_side.as_str())
            .bind(draft.reference.as_deref())
            .bind(draft.notes.as_deref())
            .bind(draft.method.as_str())
            .bind(draft.confidence_score)
            .bind(draft.task_id)
            .bind(created_by)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("Failed to create match"))?;

            for (side, ids) in [("bank", &draft.bank_transaction_ids), ("book", &book_ids)] {
                sqlx::query(
                    r#"
                    INSERT INTO match_members (match_id, side, transaction_id)
                    SELECT $1, $2, UNNEST($3::uuid[])
                    "#,
                )
                .bind(row.id)
                .bind(side)
                .bind(ids)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        warn!(match_id = %row.id, "Active membership conflict");
                        ReconError::AlreadyMatched {
                            bank_ids: draft.bank_transaction_ids.clone(),
                            book_ids: book_ids.clone(),
                        }
                    } else {
                        ReconError::Store(anyhow::anyhow!("Failed to record match members: {}", e))
                    }
                })?;
            }

            sqlx::query(
                "UPDATE bank_transactions SET state = 'matched' WHERE tenant_id = $1 AND id = ANY($2)",
            )
            .bind(tenant_id)
            .bind(&draft.bank_transaction_ids)
            .execute(&mut *tx)
            .await
            .map_err(db_err("Failed to mark bank transactions matched"))?;

            sqlx::query(
                "UPDATE book_transactions SET reconciled = TRUE WHERE tenant_id = $1 AND id = ANY($2)",
            )
            .bind(tenant_id)
            .bind(&book_ids)
            .execute(&mut *tx)
            .await
            .map_err(db_err("Failed to mark book transactions reconciled"))?;

            created.push(Match::from(row));
        }

        tx.commit().await.map_err(db_err("Failed to commit matches"))?;

        timer.observe_duration();
        info!(created = created.len(), "Matches committed");
        Ok(created)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, match_id = %match_id))]
    async fn unmatch(&self, tenant_id: Uuid, match_id: Uuid) -> Result<Match, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["unmatch"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin"))?;
        let current = sqlx::query_as::<_, MatchRow>(&format!(
            "SELECT {} FROM matches WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
            MATCH_COLUMNS
        ))
        .bind(tenant_id)
        .bind(match_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to lock match"))?
        .ok_or_else(|| ReconError::not_found("match", match_id))?;

        if !current.active {
            return Err(ReconError::validation("match is already inactive"));
        }

        let row = sqlx::query_as::<_, MatchRow>(&format!(
            r#"
            UPDATE matches SET active = FALSE, unmatched_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING {}
            "#,
            MATCH_COLUMNS
        ))
        .bind(tenant_id)
        .bind(match_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("Failed to deactivate match"))?;

        sqlx::query("UPDATE match_members SET active = FALSE WHERE match_id = $1")
            .bind(match_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err("Failed to release match members"))?;

        sqlx::query(
            "UPDATE bank_transactions SET state = 'unmatched' WHERE tenant_id = $1 AND id = ANY($2)",
        )
        .bind(tenant_id)
        .bind(&row.bank_transaction_ids)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to reset bank transactions"))?;

        sqlx::query(
            "UPDATE book_transactions SET reconciled = FALSE WHERE tenant_id = $1 AND id = ANY($2)",
        )
        .bind(tenant_id)
        .bind(&row.book_transaction_ids)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to reset book transactions"))?;

        tx.commit().await.map_err(db_err("Failed to commit unmatch"))?;

        timer.observe_duration();
        info!("Match deactivated");
        Ok(row.into())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn list_matches(
        &self,
        tenant_id: Uuid,
        active_only: bool,
        query: ListQuery,
    ) -> Result<Vec<Match>, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_matches"])
            .start_timer();

        let rows = sqlx::query_as::<_, MatchRow>(&format!(
            r#"
            SELECT {}
            FROM matches
            WHERE tenant_id = $1 AND (NOT $2 OR active)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
            MATCH_COLUMNS
        ))
        .bind(tenant_id)
        .bind(active_only)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list matches"))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn match_history(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<MatchHistoryEntry>, ReconError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["match_history"])
            .start_timer();

        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT m.id AS match_id,
                   COALESCE((SELECT string_agg(b.description, ' ')
                             FROM bank_transactions b
                             WHERE b.id = ANY(m.bank_transaction_ids)), '') AS bank_description,
                   l.account_id AS ledger_account_id,
                   c.account_id AS counterpart_account_id,
                   c.cost_center_id AS cost_center_id
            FROM matches m
            JOIN book_transactions l ON l.id = m.book_transaction_ids[1]
            LEFT JOIN LATERAL (
                SELECT o.account_id, o.cost_center_id
                FROM book_transactions o
                WHERE o.tenant_id = m.tenant_id
                  AND o.transaction_id = l.transaction_id
                  AND o.account_id <> l.account_id
                  AND o.state <> 'cancelled'
                ORDER BY o.created_at
                LIMIT 1
            ) c ON TRUE
            WHERE m.tenant_id = $1 AND m.active
            ORDER BY m.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load match history"))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
