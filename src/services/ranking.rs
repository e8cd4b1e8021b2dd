//! Story read-model scoring: freshness, volume, engagement, and feedback
//! penalty combined into the single score the public feed sorts by.

#[derive(Debug, Clone, Copy, Default)]
pub struct FeedbackCounts {
    pub useful: i64,
    pub noise: i64,
    pub bad_cluster: i64,
}

impl FeedbackCounts {
    fn penalty(self) -> f64 {
        ((self.noise + self.bad_cluster - self.useful).max(0)) as f64
    }
}

pub struct StoryInputs {
    pub tweet_count: i64,
    pub unique_user_count: i64,
    pub hours_since_last_seen: f64,
    pub total_member_engagement: f64,
    pub feedback: FeedbackCounts,
}

/// likes + 2*retweets + 1.5*quotes + replies + 0.2*bookmarks, summed over
/// a cluster's member posts, is computed by the caller and passed in as
/// `total_member_engagement`; this is the per-post term used to build it.
pub fn member_engagement(likes: i64, retweets: i64, quotes: i64, replies: i64, bookmarks: i64) -> f64 {
    likes as f64 + 2.0 * retweets as f64 + 1.5 * quotes as f64 + replies as f64 + 0.2 * bookmarks as f64
}

pub fn score(inputs: &StoryInputs) -> f64 {
    let freshness = (-inputs.hours_since_last_seen / 18.0).exp();
    let volume = (1.0 + inputs.tweet_count as f64 * (inputs.unique_user_count.max(1)) as f64).ln();
    let engagement = (1.0 + inputs.total_member_engagement).ln();
    let feedback_penalty = inputs.feedback.penalty();

    120.0 * freshness + 18.0 * volume + 3.0 * engagement - 8.0 * feedback_penalty
}

/// Tie-breaks after score: higher tweet count, then higher unique-user
/// count, then newer `last_seen_at`.
pub fn compare_for_ranking(
    a_score: f64,
    a_tweet_count: i64,
    a_unique_users: i64,
    a_last_seen: chrono::DateTime<chrono::Utc>,
    b_score: f64,
    b_tweet_count: i64,
    b_unique_users: i64,
    b_last_seen: chrono::DateTime<chrono::Utc>,
) -> std::cmp::Ordering {
    b_score
        .partial_cmp(&a_score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(b_tweet_count.cmp(&a_tweet_count))
        .then(b_unique_users.cmp(&a_unique_users))
        .then(b_last_seen.cmp(&a_last_seen))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_the_worked_score_example() {
        let inputs = StoryInputs {
            tweet_count: 6,
            unique_user_count: 4,
            hours_since_last_seen: 2.0,
            total_member_engagement: 500.0,
            feedback: FeedbackCounts {
                useful: 1,
                noise: 2,
                bad_cluster: 0,
            },
        };
        let s = score(&inputs);
        // Spec's worked example rounds to ~176.6 using ln(25)~=3.258; the
        // true value is ln(25)~=3.219, giving 175.97. Pinned to the correct
        // value rather than the spec's rounding slip.
        assert!((s - 175.97).abs() < 0.05, "expected ~175.97, got {s}");
    }

    #[test]
    fn feedback_penalty_floors_at_zero() {
        let counts = FeedbackCounts {
            useful: 10,
            noise: 1,
            bad_cluster: 0,
        };
        assert_eq!(counts.penalty(), 0.0);
    }

    #[test]
    fn ranking_breaks_ties_by_tweet_count_then_recency() {
        use chrono::{TimeZone, Utc};
        let older = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let ordering = compare_for_ranking(10.0, 5, 3, older, 10.0, 5, 3, newer);
        assert_eq!(ordering, std::cmp::Ordering::Greater);
    }
}
