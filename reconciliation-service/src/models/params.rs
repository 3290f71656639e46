use crate::error::ReconError;
use serde::{Deserialize, Serialize};

/// Hard ceiling on either group size; combinatorics beyond this are not useful.
pub const MAX_GROUP_SIZE: usize = 8;
pub const MAX_SUGGESTIONS_LIMIT: usize = 100;
/// Ceiling on day tolerances and spans (ten years).
pub const MAX_DAY_WINDOW: i64 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunDirection {
    #[default]
    BankFirst,
    BookFirst,
}

impl RunDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BankFirst => "bank_first",
            Self::BookFirst => "book_first",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub date_weight: f64,
    pub amount_weight: f64,
    pub currency_weight: f64,
    pub embedding_weight: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            date_weight: 0.3,
            amount_weight: 0.4,
            currency_weight: 0.1,
            embedding_weight: 0.2,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.date_weight + self.amount_weight + self.currency_weight + self.embedding_weight
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let all = [
            ("date_weight", self.date_weight),
            ("amount_weight", self.amount_weight),
            ("currency_weight", self.currency_weight),
            ("embedding_weight", self.embedding_weight),
        ];
        for (name, w) in all {
            if !w.is_finite() || w < 0.0 {
                return Err(ReconError::validation(format!(
                    "{} must be a non-negative number",
                    name
                )));
            }
        }
        if self.sum() <= 0.0 {
            return Err(ReconError::validation("weights must not all be zero"));
        }
        Ok(())
    }
}

/// Fully resolved run parameters. Snapshotted onto a task at submit time so later
/// config edits never change how a task ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchParams {
    pub max_group_size_bank: usize,
    pub max_group_size_book: usize,
    pub amount_tolerance: i64,
    pub date_tolerance_days: i64,
    pub group_date_span_days: i64,
    pub min_confidence: f64,
    pub max_suggestions: usize,
    pub weights: ScoreWeights,
    pub allow_mixed_signs: bool,
    pub allow_mixed_currencies: bool,
    #[serde(default)]
    pub direction: RunDirection,
    #[serde(default)]
    pub auto_match: bool,
    pub auto_match_threshold: f64,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            max_group_size_bank: 2,
            max_group_size_book: 2,
            amount_tolerance: 0,
            date_tolerance_days: 3,
            group_date_span_days: 3,
            min_confidence: 0.5,
            max_suggestions: 5,
            weights: ScoreWeights::default(),
            allow_mixed_signs: false,
            allow_mixed_currencies: false,
            direction: RunDirection::BankFirst,
            auto_match: false,
            auto_match_threshold: 1.0 - f64::EPSILON,
        }
    }
}

impl MatchParams {
    pub fn validate(&self) -> Result<(), ReconError> {
        for (name, size) in [
            ("max_group_size_bank", self.max_group_size_bank),
            ("max_group_size_book", self.max_group_size_book),
        ] {
            if size == 0 || size > MAX_GROUP_SIZE {
                return Err(ReconError::validation(format!(
                    "{} must be between 1 and {}",
                    name, MAX_GROUP_SIZE
                )));
            }
        }
        if self.amount_tolerance < 0 {
            return Err(ReconError::validation("amount_tolerance must be >= 0"));
        }
        for (name, days) in [
            ("date_tolerance_days", self.date_tolerance_days),
            ("group_date_span_days", self.group_date_span_days),
        ] {
            if !(0..=MAX_DAY_WINDOW).contains(&days) {
                return Err(ReconError::validation(format!(
                    "{} must be between 0 and {}",
                    name, MAX_DAY_WINDOW
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ReconError::validation("min_confidence must be within [0, 1]"));
        }
        if self.max_suggestions == 0 || self.max_suggestions > MAX_SUGGESTIONS_LIMIT {
            return Err(ReconError::validation(format!(
                "max_suggestions must be between 1 and {}",
                MAX_SUGGESTIONS_LIMIT
            )));
        }
        if !(0.0..=1.0).contains(&self.auto_match_threshold) {
            return Err(ReconError::validation(
                "auto_match_threshold must be within [0, 1]",
            ));
        }
        self.weights.validate()
    }
}
