use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BooleanOp {
    #[default]
    #[serde(alias = "AND")]
    And,
    #[serde(alias = "OR")]
    Or,
}

/// A single column filter as the UI sends it. Validated into a typed predicate
/// before it is used for selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(alias = "columnId")]
    pub column_id: String,
    pub operator: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterStack {
    #[serde(default)]
    pub filters: Vec<FilterRule>,
    #[serde(default)]
    pub operator: BooleanOp,
}

impl FilterStack {
    /// True when no enabled rule remains.
    pub fn is_empty(&self) -> bool {
        self.filters.iter().all(|f| f.disabled)
    }
}
