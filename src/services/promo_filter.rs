//! Heuristic suppression of promotional/spam clusters and clusters that
//! carry no real factual content. Deliberately conservative and pluggable —
//! not content moderation.

use regex::Regex;
use std::sync::LazyLock;

const PROMOTIONAL_TERMS: &[&str] = &[
    "airdrop",
    "whitelist",
    "presale",
    "pump",
    "moonshot",
    "100x",
    "guaranteed profit",
    "dm me",
    "link in bio",
    "limited spots",
    "free signals",
    "join now",
    "giveaway",
];

static SIGNAL_SERVICE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(trading signal|signal service|telegram channel|accuracy rate|free signals)")
        .expect("static regex is valid")
});

static NUMERIC_HANDLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]{4,}").expect("static regex is valid"));

static CLAIM_WITHOUT_ATTRIBUTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^user claims\b",
        r"^(someone|person|account) (says|claims|alleges)\b",
        r"^unverified claim\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex is valid"))
    .collect()
});

/// Lowercase and collapse runs of whitespace, matching the combined-text
/// normalization the filter rules are stated against.
fn collapse(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct ClusterTextInputs<'a> {
    pub headline: Option<&'a str>,
    pub facts: &'a [String],
    pub member_texts: &'a [String],
    pub author_handles: &'a [String],
}

fn combined_text(inputs: &ClusterTextInputs<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(h) = inputs.headline {
        parts.push(h);
    }
    for f in inputs.facts {
        parts.push(f);
    }
    for t in inputs.member_texts {
        parts.push(t);
    }
    collapse(&parts.join(" "))
}

pub fn is_promotional_or_spam(inputs: &ClusterTextInputs<'_>) -> bool {
    let text = combined_text(inputs);

    if text.contains("gwei") && text.contains("airdrop") {
        return true;
    }

    if SIGNAL_SERVICE_PATTERN.is_match(&text) {
        return true;
    }

    let hit_count = PROMOTIONAL_TERMS.iter().filter(|term| text.contains(*term)).count();
    if hit_count >= 3 {
        return true;
    }

    if hit_count >= 2 && inputs.author_handles.len() >= 3 {
        let numeric_handles = inputs
            .author_handles
            .iter()
            .filter(|h| NUMERIC_HANDLE_PATTERN.is_match(h))
            .count();
        let ratio = numeric_handles as f64 / inputs.author_handles.len() as f64;
        if ratio >= 0.6 {
            return true;
        }
    }

    false
}

pub fn is_low_information(headline: Option<&str>, facts: &[String]) -> bool {
    if facts.is_empty() {
        return true;
    }
    let Some(headline) = headline else {
        return true;
    };
    let headline = headline.trim();
    if headline.is_empty() {
        return true;
    }
    let lowered = headline.to_lowercase();
    CLAIM_WITHOUT_ATTRIBUTION_PATTERNS.iter().any(|p| p.is_match(&lowered))
}

/// `is_story_candidate` per the data model: size thresholds and neither
/// filter tripped.
#[allow(clippy::too_many_arguments)]
pub fn is_story_candidate(
    tweet_count: i64,
    unique_user_count: i64,
    min_tweets: i64,
    min_users: i64,
    inputs: &ClusterTextInputs<'_>,
    headline: Option<&str>,
    facts: &[String],
) -> bool {
    tweet_count >= min_tweets
        && unique_user_count >= min_users
        && !is_promotional_or_spam(inputs)
        && !is_low_information(headline, facts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gwei_and_airdrop_together_trip_the_filter() {
        let inputs = ClusterTextInputs {
            headline: Some("Huge GWEI airdrop incoming"),
            facts: &[],
            member_texts: &[],
            author_handles: &[],
        };
        assert!(is_promotional_or_spam(&inputs));
    }

    #[test]
    fn gwei_alone_does_not_trip_the_filter() {
        let inputs = ClusterTextInputs {
            headline: Some("Gas prices spike to 200 gwei"),
            facts: &[],
            member_texts: &[],
            author_handles: &[],
        };
        assert!(!is_promotional_or_spam(&inputs));
    }

    #[test]
    fn three_promotional_terms_trip_the_filter() {
        let inputs = ClusterTextInputs {
            headline: Some("Join our presale, guaranteed profit, link in bio"),
            facts: &[],
            member_texts: &[],
            author_handles: &[],
        };
        assert!(is_promotional_or_spam(&inputs));
    }

    #[test]
    fn two_terms_with_numeric_handle_majority_trips_the_filter() {
        let inputs = ClusterTextInputs {
            headline: Some("presale pump incoming"),
            facts: &[],
            member_texts: &[],
            author_handles: &["user48213", "crypto99120", "trader5591"]
                .map(String::from)
                .to_vec(),
        };
        assert!(is_promotional_or_spam(&inputs));
    }

    #[test]
    fn two_terms_with_few_handles_does_not_trip_the_filter() {
        let inputs = ClusterTextInputs {
            headline: Some("presale pump incoming"),
            facts: &[],
            member_texts: &[],
            author_handles: &["alice", "bob"].map(String::from).to_vec(),
        };
        assert!(!is_promotional_or_spam(&inputs));
    }

    #[test]
    fn no_facts_is_low_information() {
        assert!(is_low_information(Some("Something happened"), &[]));
    }

    #[test]
    fn empty_headline_is_low_information() {
        assert!(is_low_information(Some("   "), &["a fact".to_string()]));
    }

    #[test]
    fn unattributed_claim_headline_is_low_information() {
        assert!(is_low_information(
            Some("User claims exchange is insolvent"),
            &["a fact".to_string()]
        ));
    }

    #[test]
    fn substantive_headline_with_facts_is_not_low_information() {
        assert!(!is_low_information(
            Some("Exchange X lists TOKEN"),
            &["Exchange X listed TOKEN on its spot market".to_string()]
        ));
    }
}
