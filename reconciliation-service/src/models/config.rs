use super::filter::FilterStack;
use super::params::{MatchParams, ScoreWeights};
use crate::error::ReconError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigScope {
    Global,
    Company,
    User,
    CompanyUser,
}

impl ConfigScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Company => "company",
            Self::User => "user",
            Self::CompanyUser => "company_user",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "company" => Self::Company,
            "user" => Self::User,
            "company_user" => Self::CompanyUser,
            _ => Self::Global,
        }
    }
}

/// A saved reconciliation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconConfig {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub scope: ConfigScope,
    pub company_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub bank_filters: FilterStack,
    pub book_filters: FilterStack,
    pub max_group_size_bank: usize,
    pub max_group_size_book: usize,
    pub amount_tolerance: i64,
    pub date_tolerance_days: i64,
    pub group_date_span_days: i64,
    pub min_confidence: f64,
    pub max_suggestions: usize,
    #[serde(flatten)]
    pub weights: ScoreWeights,
    pub allow_mixed_signs: bool,
    pub allow_mixed_currencies: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReconConfig {
    /// Whether a caller in the given company/user context may see this rule.
    pub fn visible_to(&self, company_id: Option<Uuid>, user_id: &str) -> bool {
        match self.scope {
            ConfigScope::Global => true,
            ConfigScope::Company => self.company_id.is_some() && self.company_id == company_id,
            ConfigScope::User => self.user_id.as_deref() == Some(user_id),
            ConfigScope::CompanyUser => {
                self.company_id.is_some()
                    && self.company_id == company_id
                    && self.user_id.as_deref() == Some(user_id)
            }
        }
    }

    pub fn slot(&self) -> (ConfigScope, Option<Uuid>, Option<&str>) {
        (self.scope, self.company_id, self.user_id.as_deref())
    }

    pub fn from_draft(
        id: Uuid,
        tenant_id: Uuid,
        draft: ReconConfigDraft,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            name: draft.name,
            scope: draft.scope,
            company_id: draft.company_id,
            user_id: draft.user_id,
            bank_filters: draft.bank_filters,
            book_filters: draft.book_filters,
            max_group_size_bank: draft.max_group_size_bank,
            max_group_size_book: draft.max_group_size_book,
            amount_tolerance: draft.amount_tolerance,
            date_tolerance_days: draft.date_tolerance_days,
            group_date_span_days: draft.group_date_span_days,
            min_confidence: draft.min_confidence,
            max_suggestions: draft.max_suggestions,
            weights: draft.weights,
            allow_mixed_signs: draft.allow_mixed_signs,
            allow_mixed_currencies: draft.allow_mixed_currencies,
            is_default: draft.is_default,
            created_at,
            updated_at,
        }
    }

    /// Run parameters this rule resolves to.
    pub fn params(&self) -> MatchParams {
        MatchParams {
            max_group_size_bank: self.max_group_size_bank,
            max_group_size_book: self.max_group_size_book,
            amount_tolerance: self.amount_tolerance,
            date_tolerance_days: self.date_tolerance_days,
            group_date_span_days: self.group_date_span_days,
            min_confidence: self.min_confidence,
            max_suggestions: self.max_suggestions,
            weights: self.weights,
            allow_mixed_signs: self.allow_mixed_signs,
            allow_mixed_currencies: self.allow_mixed_currencies,
            ..MatchParams::default()
        }
    }
}

/// Writable fields of a rule, used for both create and full update.
#[derive(Debug, Clone)]
pub struct ReconConfigDraft {
    pub name: String,
    pub scope: ConfigScope,
    pub company_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub bank_filters: FilterStack,
    pub book_filters: FilterStack,
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
    pub is_default: bool,
}

impl ReconConfigDraft {
    pub fn validate(&self) -> Result<(), ReconError> {
        if self.name.trim().is_empty() {
            return Err(ReconError::validation("name must not be empty"));
        }
        match (self.scope, self.company_id.is_some(), self.user_id.is_some()) {
            (ConfigScope::Global, false, false)
            | (ConfigScope::Company, true, false)
            | (ConfigScope::User, false, true)
            | (ConfigScope::CompanyUser, true, true) => {}
            (scope, _, _) => {
                return Err(ReconError::validation(format!(
                    "scope '{}' requires {}",
                    scope.as_str(),
                    match scope {
                        ConfigScope::Global => "neither company_id nor user_id",
                        ConfigScope::Company => "company_id and no user_id",
                        ConfigScope::User => "user_id and no company_id",
                        ConfigScope::CompanyUser => "both company_id and user_id",
                    }
                )));
            }
        }
        self.params().validate()
    }

    pub fn params(&self) -> MatchParams {
        MatchParams {
            max_group_size_bank: self.max_group_size_bank,
            max_group_size_book: self.max_group_size_book,
            amount_tolerance: self.amount_tolerance,
            date_tolerance_days: self.date_tolerance_days,
            group_date_span_days: self.group_date_span_days,
            min_confidence: self.min_confidence,
            max_suggestions: self.max_suggestions,
            weights: self.weights,
            allow_mixed_signs: self.allow_mixed_signs,
            allow_mixed_currencies: self.allow_mixed_currencies,
            ..MatchParams::default()
        }
    }

    pub fn slot(&self) -> (ConfigScope, Option<Uuid>, Option<&str>) {
        (self.scope, self.company_id, self.user_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(scope: ConfigScope, company: bool, user: bool) -> ReconConfigDraft {
        let p = MatchParams::default();
        ReconConfigDraft {
            name: "rule".to_string(),
            scope,
            company_id: company.then(Uuid::new_v4),
            user_id: user.then(|| "u-1".to_string()),
            bank_filters: FilterStack::default(),
            book_filters: FilterStack::default(),
            max_group_size_bank: p.max_group_size_bank,
            max_group_size_book: p.max_group_size_book,
            amount_tolerance: p.amount_tolerance,
            date_tolerance_days: p.date_tolerance_days,
            group_date_span_days: p.group_date_span_days,
            min_confidence: p.min_confidence,
            max_suggestions: p.max_suggestions,
            weights: p.weights,
            allow_mixed_signs: false,
            allow_mixed_currencies: false,
            is_default: false,
        }
    }

    #[test]
    fn scope_ownership_rules() {
        assert!(draft(ConfigScope::Global, false, false).validate().is_ok());
        assert!(draft(ConfigScope::Global, true, false).validate().is_err());
        assert!(draft(ConfigScope::Company, true, false).validate().is_ok());
        assert!(draft(ConfigScope::Company, false, false).validate().is_err());
        assert!(draft(ConfigScope::User, false, true).validate().is_ok());
        assert!(draft(ConfigScope::User, true, true).validate().is_err());
        assert!(draft(ConfigScope::CompanyUser, true, true).validate().is_ok());
        assert!(draft(ConfigScope::CompanyUser, false, true).validate().is_err());
    }
}
