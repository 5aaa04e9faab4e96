//! Heuristic check for questions too vague to turn into a precise query.

use regex::Regex;
use std::sync::LazyLock;

const MIN_WORD_COUNT: usize = 4;

const METRIC_TERMS: &[&str] = &[
    "revenue", "sales", "profit", "spend", "order value", "aov", "margin", "gmv", "units",
    "quantity", "orders", "growth", "grew", "increase", "decrease", "rate", "avg", "average",
    "mean",
];

static VAGUE_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(best|top|most|highest|lowest|biggest|popular|trending|leading|fastest)\b")
        .expect("valid regex")
});

static BY_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bby\s+[\w\- ]{2,}").expect("valid regex"));

static NUMERIC_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(top|best|bottom|highest|lowest|fastest)\s+\d+\b").expect("valid regex")
});

static TIME_CONTEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
          \b20\d{2}\b
        | \bq[1-4]\s*20\d{2}\b
        | \b(last|past|this)\s+(year|quarter|month|week|day|\d+\s+(days|weeks|months|years))\b
        | \bmonth[-\s]?over[-\s]?month\b",
    )
    .expect("valid regex")
});

/// Returns why `question` is ambiguous, or `None` if it is specific enough.
///
/// Short questions are always ambiguous. Longer ones are only ambiguous when
/// they rank something ("best", "top", ...) without saying by what metric,
/// how many, grouped by what, or over which period.
pub fn ambiguity_reason(question: &str) -> Option<&'static str> {
    let text = question.to_lowercase();

    if text.split_whitespace().count() < MIN_WORD_COUNT {
        return Some("the question is very short");
    }

    if !VAGUE_TERM.is_match(&text) {
        return None;
    }

    let has_clarifier = METRIC_TERMS.iter().any(|m| text.contains(m))
        || BY_CLAUSE.is_match(&text)
        || NUMERIC_LIMIT.is_match(&text)
        || TIME_CONTEXT.is_match(&text);

    if has_clarifier {
        None
    } else {
        Some("it ranks results without naming a metric, limit, grouping or time period")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_ambiguous(question: &str) -> bool {
        ambiguity_reason(question).is_some()
    }

    #[test]
    fn short_questions_are_ambiguous() {
        assert!(is_ambiguous("List all customers"));
        assert!(is_ambiguous("best products"));
    }

    #[test]
    fn filter_questions_pass() {
        assert!(!is_ambiguous("Which customers live in the UK?"));
        assert!(!is_ambiguous("List all customers with a NULL country"));
    }

    #[test]
    fn ranking_without_clarifier_is_ambiguous() {
        assert!(is_ambiguous("Who are our best customers overall?"));
        assert!(is_ambiguous("Show me the most popular products please"));
    }

    #[test]
    fn any_clarifier_resolves_ranking() {
        assert!(!is_ambiguous("Who are the best customers by total spend?"));
        assert!(!is_ambiguous("Show the top 5 customers overall"));
        assert!(!is_ambiguous("Which products had the highest revenue?"));
        assert!(!is_ambiguous("Who were the top customers in 2024?"));
        assert!(!is_ambiguous("Who were our best customers last quarter?"));
        assert!(!is_ambiguous("Which regions are trending month over month?"));
    }
}
