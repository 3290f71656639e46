use super::candidates::{Candidate, CandidatePools, PoolItem};
use super::similarity::DescriptionSimilarity;
use crate::models::{MatchParams, ScoreBreakdown};

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub bank_sum: i64,
    pub book_sum: i64,
}

impl ScoredCandidate {
    pub fn amount_delta(&self) -> i64 {
        self.bank_sum.saturating_sub(self.book_sum).saturating_abs()
    }

    pub fn member_count(&self) -> usize {
        self.candidate.bank.len() + self.candidate.book.len()
    }
}

pub fn amount_score(delta: i64, tolerance: i64) -> f64 {
    let delta = delta.saturating_abs();
    if tolerance == 0 {
        return if delta == 0 { 1.0 } else { 0.0 };
    }
    (1.0 - delta as f64 / tolerance as f64).max(0.0)
}

pub fn date_score(mean_diff_days: f64, tolerance_days: i64) -> f64 {
    let diff = mean_diff_days.abs();
    if tolerance_days == 0 {
        return if diff < 1e-9 { 1.0 } else { 0.0 };
    }
    (1.0 - diff / tolerance_days as f64).max(0.0)
}

/// Weighted blend of the sub-scores, divided by the weight sum.
pub struct Scorer<'a> {
    params: &'a MatchParams,
    similarity: &'a dyn DescriptionSimilarity,
}

impl<'a> Scorer<'a> {
    pub fn new(params: &'a MatchParams, similarity: &'a dyn DescriptionSimilarity) -> Self {
        Self { params, similarity }
    }

    pub fn score(&self, pools: &CandidatePools, candidate: Candidate) -> ScoredCandidate {
        let bank: Vec<&PoolItem> = candidate.bank.iter().map(|&i| pools.bank.item(i)).collect();
        let book: Vec<&PoolItem> = candidate.book.iter().map(|&i| pools.book.item(i)).collect();

        let bank_sum = saturating_sum(&bank);
        let book_sum = saturating_sum(&book);

        let amount = amount_score(bank_sum.saturating_sub(book_sum), self.params.amount_tolerance);
        let date = date_score(
            mean_day(&bank) - mean_day(&book),
            self.params.date_tolerance_days,
        );

        let first_currency = bank.first().map(|t| t.currency_id.as_str());
        let single_currency = bank
            .iter()
            .chain(book.iter())
            .all(|t| Some(t.currency_id.as_str()) == first_currency);
        let currency = if single_currency { 1.0 } else { 0.0 };

        let description = self
            .similarity
            .similarity(&joined_description(&bank), &joined_description(&book))
            .clamp(0.0, 1.0);

        let breakdown = ScoreBreakdown {
            amount,
            date,
            currency,
            description,
        };

        let score = if !single_currency && !self.params.allow_mixed_currencies {
            0.0
        } else {
            let w = &self.params.weights;
            // Same summation order as ScoreWeights::sum so a perfect candidate lands on exactly 1.0.
            let weighted = w.date_weight * date
                + w.amount_weight * amount
                + w.currency_weight * currency
                + w.embedding_weight * description;
            (weighted / w.sum()).clamp(0.0, 1.0)
        };

        ScoredCandidate {
            candidate,
            score,
            breakdown,
            bank_sum,
            book_sum,
        }
    }
}

fn saturating_sum(items: &[&PoolItem]) -> i64 {
    items.iter().fold(0i64, |acc, t| acc.saturating_add(t.amount))
}

fn mean_day(items: &[&PoolItem]) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    items.iter().map(|t| t.day as f64).sum::<f64>() / items.len() as f64
}

pub(crate) fn joined_description(items: &[&PoolItem]) -> String {
    items
        .iter()
        .map(|t| t.description.as_str())
        .filter(|d| !d.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
