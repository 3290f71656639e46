//! Candidate grouping: enumerates bank-subset x book-subset combinations that
//! could be one economic event.
//!
//! The search is anchored on a single target. Anchor-side groups grow by a
//! depth-first walk over the target's nearest date neighbours; for each group
//! the counter side is searched as a bounded subset-sum over amount-sorted
//! members inside the date window.

use crate::models::{BankTransaction, BookTransaction, MatchParams, TargetSide};
use chrono::{Datelike, NaiveDate};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PoolItem {
    pub id: Uuid,
    pub date: NaiveDate,
    pub day: i64,
    pub amount: i64,
    pub currency_id: String,
    pub description: String,
    pub entity_id: Option<Uuid>,
}

impl PoolItem {
    fn non_negative(&self) -> bool {
        self.amount >= 0
    }
}

impl From<&BankTransaction> for PoolItem {
    fn from(t: &BankTransaction) -> Self {
        Self {
            id: t.id,
            date: t.date,
            day: day_number(t.date),
            amount: t.amount,
            currency_id: t.currency_id.clone(),
            description: t.description.clone(),
            entity_id: t.entity_id,
        }
    }
}

impl From<&BookTransaction> for PoolItem {
    fn from(t: &BookTransaction) -> Self {
        Self {
            id: t.id,
            date: t.date,
            day: day_number(t.date),
            amount: t.amount,
            currency_id: t.currency_id.clone(),
            description: t.description.clone(),
            entity_id: t.entity_id,
        }
    }
}

pub fn day_number(date: NaiveDate) -> i64 {
    date.num_days_from_ce() as i64
}

/// One side's transactions with a date index.
#[derive(Debug, Clone, Default)]
pub struct Pool {
    items: Vec<PoolItem>,
    by_day: Vec<usize>,
}

impl Pool {
    pub fn new(items: Vec<PoolItem>) -> Self {
        let mut by_day: Vec<usize> = (0..items.len()).collect();
        by_day.sort_by_key(|&i| (items[i].day, i));
        Self { items, by_day }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, index: usize) -> &PoolItem {
        &self.items[index]
    }

    pub fn items(&self) -> &[PoolItem] {
        &self.items
    }

    /// Indices of items dated within `[from, to]`, in date order.
    fn window(&self, from: i64, to: i64) -> &[usize] {
        let lo = self.by_day.partition_point(|&i| self.items[i].day < from);
        let hi = self.by_day.partition_point(|&i| self.items[i].day <= to);
        &self.by_day[lo..hi.max(lo)]
    }
}

#[derive(Debug, Clone, Default)]
pub struct CandidatePools {
    pub bank: Pool,
    pub book: Pool,
}

impl CandidatePools {
    pub fn new(bank: &[BankTransaction], book: &[BookTransaction]) -> Self {
        Self {
            bank: Pool::new(bank.iter().map(PoolItem::from).collect()),
            book: Pool::new(book.iter().map(PoolItem::from).collect()),
        }
    }

    pub fn side(&self, side: TargetSide) -> &Pool {
        match side {
            TargetSide::Bank => &self.bank,
            TargetSide::Book => &self.book,
        }
    }
}

/// Member indices into the bank and book pools, each ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub bank: Vec<usize>,
    pub book: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    pub max_candidates_per_target: usize,
    pub neighbour_limit: usize,
    /// Upper bound on subset-sum branches explored per target.
    pub search_budget: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_candidates_per_target: 200,
            neighbour_limit: 12,
            search_budget: 50_000,
        }
    }
}

/// Aggregate of an anchor-side group that the counter search matches against.
struct GroupProfile<'a> {
    sum: i64,
    mean_day: f64,
    currency_id: &'a str,
    non_negative: bool,
}

/// Enumerates candidates for one target. Truncates at `max_candidates_per_target`.
pub fn enumerate_candidates(
    pools: &CandidatePools,
    side: TargetSide,
    target: usize,
    params: &MatchParams,
    limits: &SearchLimits,
) -> Vec<Candidate> {
    let (anchor_pool, counter_pool, anchor_max, counter_max) = match side {
        TargetSide::Bank => (
            &pools.bank,
            &pools.book,
            params.max_group_size_bank,
            params.max_group_size_book,
        ),
        TargetSide::Book => (
            &pools.book,
            &pools.bank,
            params.max_group_size_book,
            params.max_group_size_bank,
        ),
    };
    if target >= anchor_pool.len() || counter_pool.is_empty() || counter_max == 0 {
        return Vec::new();
    }

    let cap = limits.max_candidates_per_target;
    let mut budget = limits.search_budget;
    let mut out = Vec::new();

    for group in anchor_groups(anchor_pool, target, anchor_max, params, limits.neighbour_limit) {
        if out.len() >= cap || budget == 0 {
            break;
        }
        let members: Vec<&PoolItem> = group.iter().map(|&i| anchor_pool.item(i)).collect();
        let profile = GroupProfile {
            sum: members.iter().fold(0i64, |acc, m| acc.saturating_add(m.amount)),
            mean_day: members.iter().map(|m| m.day as f64).sum::<f64>() / members.len() as f64,
            currency_id: &anchor_pool.item(target).currency_id,
            non_negative: anchor_pool.item(target).non_negative(),
        };

        let subsets = CounterSearch::run(
            counter_pool,
            &profile,
            counter_max,
            params,
            cap - out.len(),
            &mut budget,
        );
        for counter in subsets {
            out.push(match side {
                TargetSide::Bank => Candidate {
                    bank: group.clone(),
                    book: counter,
                },
                TargetSide::Book => Candidate {
                    bank: counter,
                    book: group.clone(),
                },
            });
        }
    }

    out.truncate(cap);
    out
}

/// Target alone, then target plus nearest compatible neighbours up to `max_size`
/// members whose combined date span fits `group_date_span_days`.
fn anchor_groups(
    pool: &Pool,
    target: usize,
    max_size: usize,
    params: &MatchParams,
    neighbour_limit: usize,
) -> Vec<Vec<usize>> {
    let anchor = pool.item(target);
    let mut groups = vec![vec![target]];
    if max_size <= 1 {
        return groups;
    }

    let span = params.group_date_span_days;
    let mut neighbours: Vec<usize> = pool
        .window(anchor.day.saturating_sub(span), anchor.day.saturating_add(span))
        .iter()
        .copied()
        .filter(|&j| j != target)
        .filter(|&j| {
            let item = pool.item(j);
            (params.allow_mixed_currencies || item.currency_id == anchor.currency_id)
                && (params.allow_mixed_signs || item.non_negative() == anchor.non_negative())
        })
        .collect();
    neighbours.sort_by_key(|&j| ((pool.item(j).day - anchor.day).abs(), j));
    neighbours.truncate(neighbour_limit);

    let mut current = vec![target];
    grow_groups(
        pool,
        &neighbours,
        0,
        &mut current,
        (anchor.day, anchor.day),
        max_size,
        span,
        &mut groups,
    );
    groups
}

#[allow(clippy::too_many_arguments)]
fn grow_groups(
    pool: &Pool,
    neighbours: &[usize],
    start: usize,
    current: &mut Vec<usize>,
    (min_day, max_day): (i64, i64),
    max_size: usize,
    span: i64,
    groups: &mut Vec<Vec<usize>>,
) {
    for k in start..neighbours.len() {
        let day = pool.item(neighbours[k]).day;
        let bounds = (min_day.min(day), max_day.max(day));
        if bounds.1.saturating_sub(bounds.0) > span {
            continue;
        }
        current.push(neighbours[k]);
        let mut group = current.clone();
        group.sort_unstable();
        groups.push(group);
        if current.len() < max_size {
            grow_groups(pool, neighbours, k + 1, current, bounds, max_size, span, groups);
        }
        current.pop();
    }
}

/// Subset-sum search over the counter side for one anchor group.
struct CounterSearch<'a> {
    pool: &'a Pool,
    eligible: Vec<usize>,
    amounts: Vec<i128>,
    prefix: Vec<i128>,
    target: i128,
    tolerance: i128,
    span: i64,
    cap: usize,
    chosen: Vec<usize>,
    found: Vec<Vec<usize>>,
}

impl<'a> CounterSearch<'a> {
    fn run(
        pool: &'a Pool,
        profile: &GroupProfile<'_>,
        max_size: usize,
        params: &MatchParams,
        cap: usize,
        budget: &mut usize,
    ) -> Vec<Vec<usize>> {
        let tol_days = params.date_tolerance_days as f64;
        let from = (profile.mean_day - tol_days).floor() as i64;
        let to = (profile.mean_day + tol_days).ceil() as i64;

        let mut eligible: Vec<usize> = pool
            .window(from, to)
            .iter()
            .copied()
            .filter(|&j| {
                let item = pool.item(j);
                (item.day as f64 - profile.mean_day).abs() <= tol_days + 1e-9
                    && (params.allow_mixed_currencies || item.currency_id == profile.currency_id)
                    && (params.allow_mixed_signs || item.non_negative() == profile.non_negative)
            })
            .collect();
        eligible.sort_by_key(|&j| (pool.item(j).amount, j));

        let amounts: Vec<i128> = eligible.iter().map(|&j| pool.item(j).amount as i128).collect();
        let mut prefix = Vec::with_capacity(amounts.len() + 1);
        prefix.push(0i128);
        for a in &amounts {
            prefix.push(prefix[prefix.len() - 1] + a);
        }

        let mut search = CounterSearch {
            pool,
            eligible,
            amounts,
            prefix,
            target: profile.sum as i128,
            tolerance: params.amount_tolerance as i128,
            span: params.group_date_span_days,
            cap,
            chosen: Vec::new(),
            found: Vec::new(),
        };

        search.singletons();
        for size in 2..=max_size.min(search.amounts.len()) {
            if search.found.len() >= cap || *budget == 0 {
                break;
            }
            search.exact(0, size, 0, None, budget);
        }

        let CounterSearch {
            eligible, found, ..
        } = search;
        found
            .into_iter()
            .map(|positions| {
                let mut indices: Vec<usize> = positions.into_iter().map(|p| eligible[p]).collect();
                indices.sort_unstable();
                indices
            })
            .collect()
    }

    fn singletons(&mut self) {
        let lo = self
            .amounts
            .partition_point(|&a| a < self.target - self.tolerance);
        let hi = self
            .amounts
            .partition_point(|&a| a <= self.target + self.tolerance);
        for p in lo..hi.max(lo) {
            if self.found.len() >= self.cap {
                return;
            }
            self.found.push(vec![p]);
        }
    }

    /// Picks exactly `remaining` more members from positions `start..`.
    fn exact(
        &mut self,
        start: usize,
        remaining: usize,
        sum: i128,
        days: Option<(i64, i64)>,
        budget: &mut usize,
    ) {
        if remaining == 0 {
            if (sum - self.target).abs() <= self.tolerance {
                self.found.push(self.chosen.clone());
            }
            return;
        }
        let n = self.amounts.len();
        if start + remaining > n {
            return;
        }
        // Largest reachable sum uses the top `remaining` amounts.
        if sum + (self.prefix[n] - self.prefix[n - remaining]) < self.target - self.tolerance {
            return;
        }

        for i in start..=(n - remaining) {
            if self.found.len() >= self.cap || *budget == 0 {
                return;
            }
            *budget -= 1;

            // Smallest reachable sum from here uses the next `remaining` amounts.
            let lowest = sum + (self.prefix[i + remaining] - self.prefix[i]);
            if lowest > self.target + self.tolerance {
                break;
            }

            let day = self.pool.item(self.eligible[i]).day;
            let bounds = match days {
                Some((lo, hi)) => (lo.min(day), hi.max(day)),
                None => (day, day),
            };
            if bounds.1 - bounds.0 > self.span {
                continue;
            }

            self.chosen.push(i);
            self.exact(i + 1, remaining - 1, sum + self.amounts[i], Some(bounds), budget);
            self.chosen.pop();
        }
    }
}
