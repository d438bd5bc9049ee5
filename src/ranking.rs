//! Choosing the best extracted record for a goal.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

use crate::types::ExtractedRecord;

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$?\s*(?P<lo>\d+(?:\.\d{1,2})?)\s*(?:-|–|to)\s*\$?\s*(?P<hi>\d+(?:\.\d{1,2})?)")
        .expect("valid range regex")
});

static BOUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?P<op>above|over|under|below|less\s+than|more\s+than|at\s+least|at\s+most|>=|<=|>|<)\s*\$?\s*(?P<val>\d+(?:\.\d{1,2})?)",
    )
    .expect("valid bound regex")
});

static FILLER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(cheapest|lowest\s+price|find|show|get|buy|me|the)\b").expect("valid filler regex")
});

/// Price bounds expressed in a goal, e.g. "under $50" or "$20-40".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceFilter {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PriceFilter {
    pub fn from_goal(goal: &str) -> Self {
        if let Some(caps) = RANGE_RE.captures(goal) {
            let lo = caps["lo"].parse().ok();
            let hi = caps["hi"].parse().ok();
            return Self { min: lo, max: hi };
        }
        if let Some(caps) = BOUND_RE.captures(goal) {
            let value = caps["val"].parse().ok();
            let op = caps["op"].to_ascii_lowercase();
            let op = op.split_whitespace().collect::<Vec<_>>().join(" ");
            return match op.as_str() {
                "above" | "over" | "more than" | "at least" | ">" | ">=" => Self {
                    min: value,
                    max: None,
                },
                _ => Self {
                    min: None,
                    max: value,
                },
            };
        }
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    pub fn admits(&self, price: f64) -> bool {
        self.min.is_none_or(|min| price >= min) && self.max.is_none_or(|max| price <= max)
    }
}

/// The goal with price phrases and filler verbs removed, for use as a search
/// query. Falls back to the trimmed goal when nothing is left.
pub fn search_terms(goal: &str) -> String {
    let without_range = RANGE_RE.replace_all(goal, " ");
    let without_bound = BOUND_RE.replace_all(&without_range, " ");
    let cleaned = FILLER_RE.replace_all(&without_bound, " ");
    let query = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if query.is_empty() {
        goal.trim().to_string()
    } else {
        query
    }
}

/// Numeric value of a displayed price such as `$1,299.99` or `$10 - $20`
/// (the lower end of a range). Non-positive values are rejected.
pub fn parse_price(raw: &str) -> Option<f64> {
    let first = raw.split(['-', '–']).find(|part| part.chars().any(|c| c.is_ascii_digit()))?;
    let digits: String = first
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits
        .trim_matches('.')
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Orders extracted records; the smallest record wins.
pub trait Ranking: Send + Sync {
    fn compare(&self, a: &ExtractedRecord, b: &ExtractedRecord) -> Ordering;
}

/// Keeps document order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatch;

impl Ranking for FirstMatch {
    fn compare(&self, _a: &ExtractedRecord, _b: &ExtractedRecord) -> Ordering {
        Ordering::Equal
    }
}

/// Ascending price; records without a readable price sort last.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheapestPrice;

impl Ranking for CheapestPrice {
    fn compare(&self, a: &ExtractedRecord, b: &ExtractedRecord) -> Ordering {
        let price = |r: &ExtractedRecord| r.price.as_deref().and_then(parse_price);
        match (price(a), price(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

pub fn ranking_for_goal(goal: &str) -> Box<dyn Ranking> {
    let goal = goal.to_ascii_lowercase();
    if goal.contains("cheapest") || goal.contains("lowest price") {
        Box::new(CheapestPrice)
    } else {
        Box::new(FirstMatch)
    }
}

/// Pick the best record admitted by `filter`. Ties keep document order.
pub fn select_best<'a>(
    records: &'a [ExtractedRecord],
    filter: &PriceFilter,
    ranking: &dyn Ranking,
) -> Option<&'a ExtractedRecord> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            filter.is_empty()
                || r.price
                    .as_deref()
                    .and_then(parse_price)
                    .is_some_and(|p| filter.admits(p))
        })
        .min_by(|(i, a), (j, b)| ranking.compare(a, b).then(i.cmp(j)))
        .map(|(_, r)| r)
}
