use crate::models::{ConfigScope, FilterStack, MatchParams, ReconConfig, ReconConfigDraft, ScoreWeights};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Body of config create and full update. Omitted parameters take service defaults.
#[derive(Debug, Deserialize, Validate)]
pub struct ReconConfigRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,
    pub scope: ConfigScope,
    pub company_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub user_id: Option<String>,
    #[serde(default)]
    pub bank_filters: FilterStack,
    #[serde(default)]
    pub book_filters: FilterStack,
    pub max_group_size_bank: Option<usize>,
    pub max_group_size_book: Option<usize>,
    pub amount_tolerance: Option<i64>,
    #[serde(alias = "avg_date_diff_days")]
    pub date_tolerance_days: Option<i64>,
    pub group_date_span_days: Option<i64>,
    pub min_confidence: Option<f64>,
    pub max_suggestions: Option<usize>,
    pub date_weight: Option<f64>,
    pub amount_weight: Option<f64>,
    pub currency_weight: Option<f64>,
    pub embedding_weight: Option<f64>,
    #[serde(default)]
    pub allow_mixed_signs: bool,
    #[serde(default)]
    pub allow_mixed_currencies: bool,
    #[serde(default)]
    pub is_default: bool,
}

impl From<ReconConfigRequest> for ReconConfigDraft {
    fn from(r: ReconConfigRequest) -> Self {
        let d = MatchParams::default();
        let date_tolerance_days = r.date_tolerance_days.unwrap_or(d.date_tolerance_days);
        Self {
            name: r.name.trim().to_string(),
            scope: r.scope,
            company_id: r.company_id,
            user_id: r.user_id,
            bank_filters: r.bank_filters,
            book_filters: r.book_filters,
            max_group_size_bank: r.max_group_size_bank.unwrap_or(d.max_group_size_bank),
            max_group_size_book: r.max_group_size_book.unwrap_or(d.max_group_size_book),
            amount_tolerance: r.amount_tolerance.unwrap_or(d.amount_tolerance),
            date_tolerance_days,
            group_date_span_days: r.group_date_span_days.unwrap_or(date_tolerance_days),
            min_confidence: r.min_confidence.unwrap_or(d.min_confidence),
            max_suggestions: r.max_suggestions.unwrap_or(d.max_suggestions),
            weights: ScoreWeights {
                date_weight: r.date_weight.unwrap_or(d.weights.date_weight),
                amount_weight: r.amount_weight.unwrap_or(d.weights.amount_weight),
                currency_weight: r.currency_weight.unwrap_or(d.weights.currency_weight),
                embedding_weight: r.embedding_weight.unwrap_or(d.weights.embedding_weight),
            },
            allow_mixed_signs: r.allow_mixed_signs,
            allow_mixed_currencies: r.allow_mixed_currencies,
            is_default: r.is_default,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReconConfigListResponse {
    pub configs: Vec<ReconConfig>,
    pub count: usize,
}
