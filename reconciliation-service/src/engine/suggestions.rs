use super::candidates::{enumerate_candidates, CandidatePools, PoolItem, SearchLimits};
use super::scoring::{joined_description, ScoredCandidate, Scorer};
use super::similarity::DescriptionSimilarity;
use crate::models::{
    HistoricalMatch, MatchHistoryEntry, MatchParams, MemberSet, ProposedLine, ProposedTransaction,
    Suggestion, SuggestionType, TargetSide, TargetSuggestions,
};
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    pub search: SearchLimits,
    pub history_min_similarity: f64,
    pub max_historical_matches: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            search: SearchLimits::default(),
            history_min_similarity: 0.3,
            max_historical_matches: 5,
        }
    }
}

/// Turns candidate pools into ranked per-target suggestions. Pure and synchronous;
/// callers run it on the blocking pool.
#[derive(Clone)]
pub struct SuggestionEngine {
    params: MatchParams,
    limits: EngineLimits,
    similarity: Arc<dyn DescriptionSimilarity>,
}

impl SuggestionEngine {
    pub fn new(
        params: MatchParams,
        limits: EngineLimits,
        similarity: Arc<dyn DescriptionSimilarity>,
    ) -> Self {
        Self {
            params,
            limits,
            similarity,
        }
    }

    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    pub fn suggest(
        &self,
        pools: &CandidatePools,
        side: TargetSide,
        target: usize,
        history: &[MatchHistoryEntry],
    ) -> TargetSuggestions {
        let candidates =
            enumerate_candidates(pools, side, target, &self.params, &self.limits.search);
        let evaluated = candidates.len() as u64;

        let scorer = Scorer::new(&self.params, self.similarity.as_ref());
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|c| scorer.score(pools, c))
            .filter(|s| s.score >= self.params.min_confidence)
            .collect();
        scored.sort_by(|a, b| rank(pools, a, b));

        // Taken before truncation so auto-match sees duplicates ranked out of the list.
        let near_certain: Vec<MemberSet> = if self.params.auto_match {
            scored
                .iter()
                .filter(|s| s.score >= self.params.auto_match_threshold)
                .map(|s| member_set(pools, s))
                .collect()
        } else {
            Vec::new()
        };
        scored.truncate(self.params.max_suggestions);

        let suggestions: Vec<Suggestion> = scored
            .iter()
            .map(|s| self.use_existing(pools, side, target, s))
            .collect();

        let fallback = if suggestions.is_empty() && side == TargetSide::Bank {
            Some(self.create_new(pools.bank.item(target), history))
        } else {
            None
        };

        TargetSuggestions {
            target_id: pools.side(side).item(target).id,
            target_side: side,
            suggestions,
            fallback,
            candidates_evaluated: evaluated,
            near_certain,
        }
    }

    fn use_existing(
        &self,
        pools: &CandidatePools,
        side: TargetSide,
        target: usize,
        scored: &ScoredCandidate,
    ) -> Suggestion {
        let bank: Vec<&PoolItem> = scored
            .candidate
            .bank
            .iter()
            .map(|&i| pools.bank.item(i))
            .collect();
        let book: Vec<&PoolItem> = scored
            .candidate
            .book
            .iter()
            .map(|&i| pools.book.item(i))
            .collect();
        let anchor = pools.side(side).item(target);

        Suggestion {
            suggestion_type: SuggestionType::UseExistingBook,
            confidence_score: scored.score,
            bank_transaction_ids: bank.iter().map(|t| t.id).collect(),
            book_transaction_ids: book.iter().map(|t| t.id).collect(),
            transaction: ProposedTransaction {
                date: anchor.date,
                description: joined_description(&bank),
                amount: scored.bank_sum,
                currency_id: anchor.currency_id.clone(),
                entity_id: bank.iter().find_map(|t| t.entity_id),
            },
            journal_entries: Vec::new(),
            pattern: grouping_pattern(bank.len(), book.len()).to_string(),
            historical_matches: Vec::new(),
            scores: Some(scored.breakdown),
            amount_delta: scored.amount_delta(),
        }
    }

    /// Proposes a new posted transaction balancing the bank line, using the most
    /// similar past match for account choices.
    fn create_new(&self, bank: &PoolItem, history: &[MatchHistoryEntry]) -> Suggestion {
        let evidence = self.historical_evidence(&bank.description, history);
        let best = evidence.first();

        let amount = bank.amount;
        let journal_entries = vec![
            ProposedLine {
                account_id: best.map(|h| h.ledger_account_id),
                debit_amount: amount.max(0),
                credit_amount: (-amount).max(0),
                description: bank.description.clone(),
                cost_center_id: None,
                reconciles_bank: true,
            },
            ProposedLine {
                account_id: best.and_then(|h| h.counterpart_account_id),
                debit_amount: (-amount).max(0),
                credit_amount: amount.max(0),
                description: bank.description.clone(),
                cost_center_id: best.and_then(|h| h.cost_center_id),
                reconciles_bank: false,
            },
        ];
        if !is_balanced(&journal_entries) {
            tracing::warn!(bank_transaction_id = %bank.id, "Proposed journal lines are unbalanced");
        }

        let pattern = match best.and_then(|h| h.counterpart_account_id) {
            Some(account) => format!("historical:{}", account),
            None => "no_history".to_string(),
        };

        Suggestion {
            suggestion_type: SuggestionType::CreateNew,
            confidence_score: best.map(|h| h.similarity).unwrap_or(0.0),
            bank_transaction_ids: vec![bank.id],
            book_transaction_ids: Vec::new(),
            transaction: ProposedTransaction {
                date: bank.date,
                description: bank.description.clone(),
                amount,
                currency_id: bank.currency_id.clone(),
                entity_id: bank.entity_id,
            },
            journal_entries,
            pattern,
            historical_matches: evidence,
            scores: None,
            amount_delta: 0,
        }
    }

    fn historical_evidence(
        &self,
        description: &str,
        history: &[MatchHistoryEntry],
    ) -> Vec<HistoricalMatch> {
        let mut evidence: Vec<HistoricalMatch> = history
            .iter()
            .filter_map(|h| {
                let similarity = self.similarity.similarity(description, &h.bank_description);
                (similarity >= self.limits.history_min_similarity).then(|| HistoricalMatch {
                    match_id: h.match_id,
                    description: h.bank_description.clone(),
                    similarity,
                    ledger_account_id: h.ledger_account_id,
                    counterpart_account_id: h.counterpart_account_id,
                    cost_center_id: h.cost_center_id,
                })
            })
            .collect();
        evidence.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.match_id.cmp(&b.match_id))
        });
        evidence.truncate(self.limits.max_historical_matches);
        evidence
    }
}

/// Descending score, then fewer members, smaller amount delta, and member ids.
fn rank(pools: &CandidatePools, a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.member_count().cmp(&b.member_count()))
        .then_with(|| a.amount_delta().cmp(&b.amount_delta()))
        .then_with(|| {
            let ids = |s: &ScoredCandidate| {
                (
                    s.candidate
                        .bank
                        .iter()
                        .map(|&i| pools.bank.item(i).id)
                        .collect::<Vec<_>>(),
                    s.candidate
                        .book
                        .iter()
                        .map(|&i| pools.book.item(i).id)
                        .collect::<Vec<_>>(),
                )
            };
            ids(a).cmp(&ids(b))
        })
}

fn member_set(pools: &CandidatePools, scored: &ScoredCandidate) -> MemberSet {
    let bank: Vec<_> = scored.candidate.bank.iter().map(|&i| pools.bank.item(i).id).collect();
    let book: Vec<_> = scored.candidate.book.iter().map(|&i| pools.book.item(i).id).collect();
    MemberSet::new(&bank, &book)
}

fn grouping_pattern(bank: usize, book: usize) -> &'static str {
    match (bank, book) {
        (1, 1) => "one_to_one",
        (_, 1) => "many_bank_to_one_book",
        (1, _) => "one_bank_to_many_book",
        _ => "many_to_many",
    }
}

pub fn is_balanced(lines: &[ProposedLine]) -> bool {
    let debits: i64 = lines.iter().map(|l| l.debit_amount).sum();
    let credits: i64 = lines.iter().map(|l| l.credit_amount).sum();
    debits == credits
}
