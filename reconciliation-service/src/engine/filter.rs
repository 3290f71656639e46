//! Column filters: validation of UI filter stacks into a typed expression tree,
//! evaluation against transactions, and stack merging.

use crate::error::ReconError;
use crate::models::{BankTransaction, BooleanOp, BookTransaction, FilterRule, FilterStack};
use chrono::NaiveDate;
use serde_json::Value;
use std::borrow::Cow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSide {
    Bank,
    Book,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Date,
    Amount,
    Description,
    CurrencyId,
    EntityId,
    BankAccountId,
    AccountId,
    CostCenterId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Date,
    Amount,
    Text,
}

impl Column {
    fn parse(side: FilterSide, s: &str) -> Option<Self> {
        let col = match s {
            "date" => Self::Date,
            "amount" => Self::Amount,
            "description" => Self::Description,
            "currency_id" | "currencyId" | "currency" => Self::CurrencyId,
            "entity_id" | "entityId" => Self::EntityId,
            "bank_account_id" | "bankAccountId" => Self::BankAccountId,
            "account_id" | "accountId" => Self::AccountId,
            "cost_center_id" | "costCenterId" => Self::CostCenterId,
            _ => return None,
        };
        let allowed = match side {
            FilterSide::Bank => !matches!(col, Self::AccountId | Self::CostCenterId),
            FilterSide::Book => col != Self::BankAccountId,
        };
        allowed.then_some(col)
    }

    fn kind(&self) -> ColumnKind {
        match self {
            Self::Date => ColumnKind::Date,
            Self::Amount => ColumnKind::Amount,
            _ => ColumnKind::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    IsEmpty,
    IsNotEmpty,
    OneOf,
}

impl Operator {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "equals" | "=" | "is" => Self::Equals,
            "not_equals" | "!=" | "isNot" => Self::NotEquals,
            "contains" | "includes" => Self::Contains,
            "not_contains" | "doesNotInclude" => Self::NotContains,
            "starts_with" | "startsWith" => Self::StartsWith,
            "ends_with" | "endsWith" => Self::EndsWith,
            "gt" | ">" => Self::Gt,
            "gte" | ">=" => Self::Gte,
            "lt" | "<" => Self::Lt,
            "lte" | "<=" => Self::Lte,
            "is_empty" | "isEmpty" => Self::IsEmpty,
            "is_not_empty" | "isNotEmpty" => Self::IsNotEmpty,
            "one_of" | "isOneOf" | "isAnyOf" => Self::OneOf,
            _ => return None,
        })
    }

    fn applies_to(&self, kind: ColumnKind) -> bool {
        match self {
            Self::Equals | Self::NotEquals | Self::IsEmpty | Self::IsNotEmpty | Self::OneOf => {
                true
            }
            Self::Contains | Self::NotContains | Self::StartsWith | Self::EndsWith => {
                kind == ColumnKind::Text
            }
            Self::Gt | Self::Gte | Self::Lt | Self::Lte => kind != ColumnKind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Text(String),
    Amount(i64),
    Date(NaiveDate),
    TextSet(Vec<String>),
    AmountSet(Vec<i64>),
    DateSet(Vec<NaiveDate>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: Column,
    pub operator: Operator,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Leaf(Predicate),
}

/// A column value read off a transaction.
pub enum FieldValue<'a> {
    Text(Option<Cow<'a, str>>),
    Amount(i64),
    Date(NaiveDate),
}

pub trait Filterable {
    fn field(&self, column: Column) -> FieldValue<'_>;
}

fn id_text(id: Option<Uuid>) -> FieldValue<'static> {
    FieldValue::Text(id.map(|u| Cow::Owned(u.to_string())))
}

impl Filterable for BankTransaction {
    fn field(&self, column: Column) -> FieldValue<'_> {
        match column {
            Column::Date => FieldValue::Date(self.date),
            Column::Amount => FieldValue::Amount(self.amount),
            Column::Description => FieldValue::Text(Some(Cow::Borrowed(&self.description))),
            Column::CurrencyId => FieldValue::Text(Some(Cow::Borrowed(&self.currency_id))),
            Column::EntityId => id_text(self.entity_id),
            Column::BankAccountId => id_text(Some(self.bank_account_id)),
            Column::AccountId | Column::CostCenterId => FieldValue::Text(None),
        }
    }
}

impl Filterable for BookTransaction {
    fn field(&self, column: Column) -> FieldValue<'_> {
        match column {
            Column::Date => FieldValue::Date(self.date),
            Column::Amount => FieldValue::Amount(self.amount),
            Column::Description => FieldValue::Text(Some(Cow::Borrowed(&self.description))),
            Column::CurrencyId => FieldValue::Text(Some(Cow::Borrowed(&self.currency_id))),
            Column::EntityId => id_text(self.entity_id),
            Column::AccountId => id_text(Some(self.account_id)),
            Column::CostCenterId => id_text(self.cost_center_id),
            Column::BankAccountId => FieldValue::Text(None),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

impl FilterExpr {
    /// Validates a stack. `None` means the stack has no enabled rule and selects everything.
    pub fn compile(stack: &FilterStack, side: FilterSide) -> Result<Option<FilterExpr>, ReconError> {
        let leaves = stack
            .filters
            .iter()
            .filter(|r| !r.disabled)
            .map(|r| compile_rule(r, side).map(FilterExpr::Leaf))
            .collect::<Result<Vec<_>, _>>()?;

        if leaves.is_empty() {
            return Ok(None);
        }
        Ok(Some(match stack.operator {
            BooleanOp::And => FilterExpr::And(leaves),
            BooleanOp::Or => FilterExpr::Or(leaves),
        }))
    }

    pub fn matches<T: Filterable>(&self, item: &T) -> bool {
        match self {
            FilterExpr::And(children) => children.iter().all(|c| c.matches(item)),
            FilterExpr::Or(children) => children.iter().any(|c| c.matches(item)),
            FilterExpr::Leaf(p) => p.matches(item),
        }
    }
}

/// Keeps the items the expression selects; `None` keeps all.
pub fn apply_filter<T: Filterable>(expr: Option<&FilterExpr>, items: Vec<T>) -> Vec<T> {
    match expr {
        None => items,
        Some(e) => items.into_iter().filter(|i| e.matches(i)).collect(),
    }
}

fn compile_rule(rule: &FilterRule, side: FilterSide) -> Result<Predicate, ReconError> {
    let column = Column::parse(side, &rule.column_id).ok_or_else(|| {
        ReconError::validation(format!("unknown filter column '{}'", rule.column_id))
    })?;
    let operator = Operator::parse(&rule.operator).ok_or_else(|| {
        ReconError::validation(format!("unknown filter operator '{}'", rule.operator))
    })?;
    let kind = column.kind();
    if !operator.applies_to(kind) {
        return Err(ReconError::validation(format!(
            "operator '{}' cannot be applied to column '{}'",
            rule.operator, rule.column_id
        )));
    }

    let bad_value = || {
        ReconError::validation(format!(
            "invalid value for filter on column '{}'",
            rule.column_id
        ))
    };

    let operand = match operator {
        Operator::IsEmpty | Operator::IsNotEmpty => Operand::None,
        Operator::OneOf => {
            let values = rule.value.as_array().ok_or_else(bad_value)?;
            match kind {
                ColumnKind::Text => Operand::TextSet(
                    values
                        .iter()
                        .map(parse_text)
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(bad_value)?,
                ),
                ColumnKind::Amount => Operand::AmountSet(
                    values
                        .iter()
                        .map(parse_amount)
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(bad_value)?,
                ),
                ColumnKind::Date => Operand::DateSet(
                    values
                        .iter()
                        .map(parse_date)
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(bad_value)?,
                ),
            }
        }
        _ => match kind {
            ColumnKind::Text => Operand::Text(parse_text(&rule.value).ok_or_else(bad_value)?),
            ColumnKind::Amount => Operand::Amount(parse_amount(&rule.value).ok_or_else(bad_value)?),
            ColumnKind::Date => Operand::Date(parse_date(&rule.value).ok_or_else(bad_value)?),
        },
    };

    Ok(Predicate {
        column,
        operator,
        operand,
    })
}

fn parse_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.to_lowercase()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_amount(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_date(v: &Value) -> Option<NaiveDate> {
    let s = v.as_str()?;
    let day = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

// ============================================================================
// Evaluation
// ============================================================================

impl Predicate {
    fn matches<T: Filterable>(&self, item: &T) -> bool {
        match item.field(self.column) {
            FieldValue::Text(value) => {
                let value = value.map(|v| v.to_lowercase());
                self.matches_text(value.as_deref())
            }
            FieldValue::Amount(a) => match (&self.operand, self.operator) {
                (_, Operator::IsEmpty) => false,
                (_, Operator::IsNotEmpty) => true,
                (Operand::AmountSet(set), Operator::OneOf) => set.contains(&a),
                (Operand::Amount(x), op) => compare(op, a.cmp(x)),
                _ => false,
            },
            FieldValue::Date(d) => match (&self.operand, self.operator) {
                (_, Operator::IsEmpty) => false,
                (_, Operator::IsNotEmpty) => true,
                (Operand::DateSet(set), Operator::OneOf) => set.contains(&d),
                (Operand::Date(x), op) => compare(op, d.cmp(x)),
                _ => false,
            },
        }
    }

    fn matches_text(&self, value: Option<&str>) -> bool {
        let present = value.filter(|v| !v.is_empty());
        match (&self.operand, self.operator) {
            (_, Operator::IsEmpty) => present.is_none(),
            (_, Operator::IsNotEmpty) => present.is_some(),
            (Operand::TextSet(set), Operator::OneOf) => {
                present.is_some_and(|v| set.iter().any(|s| s == v))
            }
            (Operand::Text(x), Operator::Equals) => present == Some(x.as_str()),
            (Operand::Text(x), Operator::NotEquals) => present != Some(x.as_str()),
            (Operand::Text(x), Operator::Contains) => present.is_some_and(|v| v.contains(x.as_str())),
            (Operand::Text(x), Operator::NotContains) => {
                !present.is_some_and(|v| v.contains(x.as_str()))
            }
            (Operand::Text(x), Operator::StartsWith) => {
                present.is_some_and(|v| v.starts_with(x.as_str()))
            }
            (Operand::Text(x), Operator::EndsWith) => {
                present.is_some_and(|v| v.ends_with(x.as_str()))
            }
            _ => false,
        }
    }
}

fn compare(op: Operator, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        Operator::Equals => ord == Equal,
        Operator::NotEquals => ord != Equal,
        Operator::Gt => ord == Greater,
        Operator::Gte => ord != Less,
        Operator::Lt => ord == Less,
        Operator::Lte => ord != Greater,
        _ => false,
    }
}

// ============================================================================
// Merging
// ============================================================================

/// Base rules followed by overlay rules, deduplicated on (column, operator, value).
/// The overlay's boolean operator wins.
pub fn merge_filter_stacks(base: &FilterStack, overlay: &FilterStack) -> FilterStack {
    let mut filters: Vec<FilterRule> = Vec::with_capacity(base.filters.len() + overlay.filters.len());
    for rule in base.filters.iter().chain(overlay.filters.iter()) {
        let duplicate = filters.iter().any(|f| {
            f.column_id == rule.column_id && f.operator == rule.operator && f.value == rule.value
        });
        if !duplicate {
            filters.push(rule.clone());
        }
    }
    FilterStack {
        filters,
        operator: overlay.operator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BankTransactionState;
    use chrono::Utc;
    use serde_json::json;

    fn bank(amount: i64, description: &str, date: &str) -> BankTransaction {
        BankTransaction {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            bank_account_id: Uuid::nil(),
            entity_id: None,
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            amount,
            description: description.to_string(),
            currency_id: "BRL".to_string(),
            raw_hash: Uuid::new_v4().to_string(),
            state: BankTransactionState::Unmatched,
            created_at: Utc::now(),
        }
    }

    fn rule(column: &str, op: &str, value: Value) -> FilterRule {
        FilterRule {
            column_id: column.to_string(),
            operator: op.to_string(),
            value,
            disabled: false,
        }
    }

    #[test]
    fn empty_or_disabled_stack_selects_everything() {
        let mut stack = FilterStack::default();
        assert_eq!(FilterExpr::compile(&stack, FilterSide::Bank).unwrap(), None);

        let mut r = rule("amount", "gt", json!(10));
        r.disabled = true;
        stack.filters.push(r);
        assert_eq!(FilterExpr::compile(&stack, FilterSide::Bank).unwrap(), None);
    }

    #[test]
    fn and_stack_combines_text_and_amount() {
        let stack = FilterStack {
            filters: vec![
                rule("description", "includes", json!("PIX")),
                rule("amount", ">=", json!("10000")),
            ],
            operator: BooleanOp::And,
        };
        let expr = FilterExpr::compile(&stack, FilterSide::Bank).unwrap().unwrap();
        assert!(expr.matches(&bank(15000, "pix recebido", "2024-01-10")));
        assert!(!expr.matches(&bank(5000, "PIX recebido", "2024-01-10")));
        assert!(!expr.matches(&bank(15000, "TED", "2024-01-10")));
    }

    #[test]
    fn or_stack_with_dates_and_one_of() {
        let stack = FilterStack {
            filters: vec![
                rule("date", "lt", json!("2024-01-05")),
                rule("description", "isOneOf", json!(["tarifa", "iof"])),
            ],
            operator: BooleanOp::Or,
        };
        let expr = FilterExpr::compile(&stack, FilterSide::Bank).unwrap().unwrap();
        assert!(expr.matches(&bank(1, "anything", "2024-01-01")));
        assert!(expr.matches(&bank(1, "IOF", "2024-02-01")));
        assert!(!expr.matches(&bank(1, "iof extra", "2024-02-01")));
    }

    #[test]
    fn rejects_unknown_columns_operators_and_bad_values() {
        let bad_column = FilterStack {
            filters: vec![rule("account_id", "equals", json!("x"))],
            operator: BooleanOp::And,
        };
        assert!(FilterExpr::compile(&bad_column, FilterSide::Bank).is_err());

        let bad_op = FilterStack {
            filters: vec![rule("amount", "resembles", json!(1))],
            operator: BooleanOp::And,
        };
        assert!(FilterExpr::compile(&bad_op, FilterSide::Bank).is_err());

        let text_op_on_amount = FilterStack {
            filters: vec![rule("amount", "contains", json!(1))],
            operator: BooleanOp::And,
        };
        assert!(FilterExpr::compile(&text_op_on_amount, FilterSide::Book).is_err());

        let bad_date = FilterStack {
            filters: vec![rule("date", "gt", json!("yesterday"))],
            operator: BooleanOp::And,
        };
        assert!(FilterExpr::compile(&bad_date, FilterSide::Book).is_err());
    }

    #[test]
    fn empty_checks_on_optional_ids() {
        let stack = FilterStack {
            filters: vec![rule("entity_id", "isEmpty", Value::Null)],
            operator: BooleanOp::And,
        };
        let expr = FilterExpr::compile(&stack, FilterSide::Bank).unwrap().unwrap();
        let mut txn = bank(1, "x", "2024-01-01");
        assert!(expr.matches(&txn));
        txn.entity_id = Some(Uuid::new_v4());
        assert!(!expr.matches(&txn));
    }

    #[test]
    fn merge_dedups_and_keeps_overlay_operator() {
        let base = FilterStack {
            filters: vec![
                rule("amount", "gt", json!(0)),
                rule("description", "contains", json!("pix")),
            ],
            operator: BooleanOp::And,
        };
        let overlay = FilterStack {
            filters: vec![
                rule("amount", "gt", json!(0)),
                rule("currency_id", "equals", json!("BRL")),
            ],
            operator: BooleanOp::Or,
        };
        let merged = merge_filter_stacks(&base, &overlay);
        assert_eq!(merged.filters.len(), 3);
        assert_eq!(merged.filters[0].column_id, "amount");
        assert_eq!(merged.filters[2].column_id, "currency_id");
        assert_eq!(merged.operator, BooleanOp::Or);
    }
}
