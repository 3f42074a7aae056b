use crate::curriculum::CurriculumWork;
use serde::Serialize;

pub const DEFAULT_TOKEN_THRESHOLD: f64 = 0.85;

/// Which strategy resolved a name. Ordered strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    Contains,
    WordOverlap,
}

#[derive(Debug, Clone, Copy)]
pub struct MatchHit<'a> {
    pub work: &'a CurriculumWork,
    pub tier: MatchTier,
}

/// Resolves free-text work names against a pool of catalogue entries.
///
/// Tiers run in order and the first hit wins; within a tier the first
/// candidate in pool order wins.
#[derive(Debug, Clone, Copy)]
pub struct NameMatcher {
    token_threshold: f64,
}

impl Default for NameMatcher {
    fn default() -> Self {
        Self {
            token_threshold: DEFAULT_TOKEN_THRESHOLD,
        }
    }
}

impl NameMatcher {
    pub fn new(token_threshold: f64) -> Self {
        Self { token_threshold }
    }

    pub fn find_best_match<'a>(
        &self,
        raw_name: &str,
        pool: &'a [CurriculumWork],
    ) -> Option<MatchHit<'a>> {
        let query = normalize_name(raw_name);
        if query.is_empty() {
            return None;
        }
        let candidates: Vec<(&CurriculumWork, String)> = pool
            .iter()
            .map(|w| (w, normalize_name(&w.name)))
            .filter(|(_, n)| !n.is_empty())
            .collect();

        if let Some((w, _)) = candidates.iter().find(|(_, n)| *n == query) {
            return Some(MatchHit {
                work: w,
                tier: MatchTier::Exact,
            });
        }

        if let Some((w, _)) = candidates
            .iter()
            .find(|(_, n)| n.contains(&query) || query.contains(n.as_str()))
        {
            return Some(MatchHit {
                work: w,
                tier: MatchTier::Contains,
            });
        }

        let tokens: Vec<&str> = query
            .split(' ')
            .filter(|t| t.chars().count() > 2)
            .collect();
        if tokens.is_empty() {
            return None;
        }
        for (w, name) in &candidates {
            let name_tokens: Vec<&str> = name.split(' ').collect();
            let hits = tokens
                .iter()
                .filter(|t| {
                    name.contains(**t)
                        || name_tokens
                            .iter()
                            .any(|nt| strsim::jaro_winkler(t, nt) >= self.token_threshold)
                })
                .count();
            if hits >= 2 || (tokens.len() == 1 && hits == 1) {
                return Some(MatchHit {
                    work: w,
                    tier: MatchTier::WordOverlap,
                });
            }
        }
        None
    }
}

/// Lowercase, trim, drop parentheses and collapse whitespace runs.
pub fn normalize_name(s: &str) -> String {
    s.to_lowercase()
        .replace(['(', ')'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
