use crate::models::{MemberSet, Suggestion, SuggestionType, TargetSuggestions};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct AutoMatchPlan {
    /// Unambiguous suggestions to commit, highest confidence first.
    pub selected: Vec<Suggestion>,
    /// Eligible suggestions dropped because another grouping competes for a member.
    pub skipped: u64,
}

/// Picks the suggestions that may be committed without review.
///
/// The same member set reached from several targets counts once. A suggestion
/// qualifies when it clears `threshold` and no other distinct grouping shares a
/// bank or book member with it. Competitors are every ranked suggestion plus the
/// near-certain candidates that `max_suggestions` cut. Members are claimed in
/// descending confidence order.
pub fn plan_auto_matches(results: &[TargetSuggestions], threshold: f64) -> AutoMatchPlan {
    let mut unique: Vec<(&Suggestion, MemberSet)> = Vec::new();
    let mut seen: HashSet<MemberSet> = HashSet::new();
    for s in results.iter().flat_map(|r| r.suggestions.iter()) {
        if s.suggestion_type != SuggestionType::UseExistingBook {
            continue;
        }
        let members = s.members();
        if seen.insert(members.clone()) {
            unique.push((s, members));
        }
    }

    let competitors: BTreeSet<&MemberSet> = unique
        .iter()
        .map(|(_, m)| m)
        .chain(results.iter().flat_map(|r| r.near_certain.iter()))
        .collect();

    let mut eligible: Vec<usize> = (0..unique.len())
        .filter(|&i| unique[i].0.confidence_score >= threshold)
        .collect();
    eligible.sort_by(|&a, &b| {
        unique[b]
            .0
            .confidence_score
            .partial_cmp(&unique[a].0.confidence_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| unique[a].1.cmp(&unique[b].1))
    });

    let mut plan = AutoMatchPlan::default();
    let mut claimed_bank: HashSet<Uuid> = HashSet::new();
    let mut claimed_book: HashSet<Uuid> = HashSet::new();

    for i in eligible {
        let (candidate, members) = &unique[i];
        let contested = competitors
            .iter()
            .any(|other| *other != members && members.overlaps(other));
        let already_claimed = members.bank.iter().any(|id| claimed_bank.contains(id))
            || members.book.iter().any(|id| claimed_book.contains(id));

        if contested || already_claimed {
            plan.skipped += 1;
            continue;
        }
        claimed_bank.extend(members.bank.iter().copied());
        claimed_book.extend(members.book.iter().copied());
        plan.selected.push((*candidate).clone());
    }

    plan
}
