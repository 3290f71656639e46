//! Matching engine: filters, candidate grouping, scoring, suggestions and the
//! auto-match policy. Everything here is synchronous and free of I/O.

pub mod auto_match;
pub mod candidates;
pub mod filter;
pub mod scoring;
pub mod similarity;
pub mod suggestions;

pub use auto_match::{plan_auto_matches, AutoMatchPlan};
pub use candidates::{enumerate_candidates, Candidate, CandidatePools, Pool, PoolItem, SearchLimits};
pub use filter::{apply_filter, merge_filter_stacks, FilterExpr, FilterSide, Filterable};
pub use scoring::{amount_score, date_score, ScoredCandidate, Scorer};
pub use similarity::{DescriptionSimilarity, TokenOverlap};
pub use suggestions::{is_balanced, EngineLimits, SuggestionEngine};
