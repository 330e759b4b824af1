//! Rank normalization for name-based lookups.
//!
//! Observation ranks are mapped onto ranks the name-matching service can be
//! queried with. Rules are evaluated in order against the lower-cased rank and
//! the first matching rule wins; unmatched ranks are queried as-is.

/// How a rule recognizes an observation rank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankMatcher {
    Exact(&'static str),
    Contains(&'static str),
}

impl RankMatcher {
    fn matches(&self, rank: &str) -> bool {
        match self {
            RankMatcher::Exact(expected) => rank == *expected,
            RankMatcher::Contains(fragment) => rank.contains(fragment),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankAction {
    /// Record carries no queryable name
    Skip,
    /// Query with a broader rank instead
    Remap(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct RankRule {
    pub matcher: RankMatcher,
    pub action: RankAction,
}

pub const RANK_RULES: [RankRule; 6] = [
    RankRule { matcher: RankMatcher::Contains("stateofmatter"), action: RankAction::Skip },
    RankRule { matcher: RankMatcher::Exact("complex"), action: RankAction::Remap("species") },
    RankRule { matcher: RankMatcher::Exact("hybrid"), action: RankAction::Remap("species") },
    RankRule { matcher: RankMatcher::Exact("epifamily"), action: RankAction::Remap("genus") },
    RankRule { matcher: RankMatcher::Exact("section"), action: RankAction::Remap("genus") },
    RankRule { matcher: RankMatcher::Exact("subtribe"), action: RankAction::Remap("family") },
];

/// Outcome of normalizing one observation rank
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedRank {
    Skip,
    Query(String),
}

pub fn normalize_rank(rank: &str) -> NormalizedRank {
    let rank = rank.trim().to_lowercase();
    for rule in RANK_RULES.iter() {
        if rule.matcher.matches(&rank) {
            return match rule.action {
                RankAction::Skip => NormalizedRank::Skip,
                RankAction::Remap(target) => NormalizedRank::Query(target.to_string()),
            };
        }
    }
    NormalizedRank::Query(rank)
}
