//! Learning engine — folds behavioral signals from each inbound message
//! into the user's cumulative [`LearningProfile`].
//!
//! Every scan is case-insensitive against fixed keyword tables, and each
//! category increments its counter at most once per message. The engine
//! is infallible by construction: it only mutates counters and bounded
//! buffers, and an empty message changes nothing.

use super::keywords::*;
use chrono::{DateTime, Utc};
use rapport_core::profile::{ConversationProfile, JoinStatus, LearningProfile};
use tracing::debug;

/// Accepted range for a response-time sample, in seconds. Deltas outside
/// it are clock skew or a conversation picked back up much later.
const RESPONSE_TIME_MAX_SECS: i64 = 3600;

/// Overall sentiment of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Classify one message by counting sentiment words on each side.
pub(crate) fn classify_sentiment(msg_lower: &str) -> Sentiment {
    let positive = POSITIVE_WORDS
        .iter()
        .filter(|w| word_match(msg_lower, w))
        .count();
    let negative = NEGATIVE_WORDS
        .iter()
        .filter(|w| word_match(msg_lower, w))
        .count();
    if positive > negative {
        Sentiment::Positive
    } else if negative > positive {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}

/// Topic tags present in a message, each at most once.
pub(crate) fn detect_topics(msg_lower: &str) -> Vec<&'static str> {
    let mut tags: Vec<&'static str> = Vec::new();
    for (keyword, tag) in TOPIC_KEYWORDS {
        if word_match(msg_lower, keyword) && !tags.contains(tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Observe one inbound message and fold its signals into the profile.
///
/// Monotonic: counters only grow. Idempotent on empty input: an empty
/// message leaves every field untouched.
pub(crate) fn observe(
    profile: &mut LearningProfile,
    text: &str,
    now: DateTime<Utc>,
    min_statement_len: usize,
) {
    if text.trim().is_empty() {
        return;
    }

    let msg_lower = text.to_lowercase();

    // Join status: explicit signals only, declines win within a message.
    if kw_match(&msg_lower, DECLINE_PHRASES) {
        profile.join_status = JoinStatus::NotJoined;
    } else if kw_match(&msg_lower, JOIN_PHRASES) {
        profile.join_status = JoinStatus::Joined;
    }

    // Link preference declines are tracked separately from join status.
    if kw_match(&msg_lower, LINK_DECLINE_PHRASES) || kw_match(&msg_lower, DECLINE_PHRASES) {
        profile.decline("group_link_interest");
    }

    // Topics: each tag once per message.
    for tag in detect_topics(&msg_lower) {
        *profile.topics.entry(tag.to_string()).or_insert(0) += 1;
    }

    // Sentiment: one counter per message.
    match classify_sentiment(&msg_lower) {
        Sentiment::Positive => profile.sentiment.positive += 1,
        Sentiment::Negative => profile.sentiment.negative += 1,
        Sentiment::Neutral => profile.sentiment.neutral += 1,
    }

    // Conversation style: each marker category once per message.
    if kw_match(&msg_lower, FORMAL_MARKERS) {
        profile.style.formal += 1;
    }
    if CASUAL_MARKERS.iter().any(|m| word_match(&msg_lower, m)) {
        profile.style.casual += 1;
    }
    if is_greeting(&msg_lower) {
        profile.style.greetings += 1;
    }
    if emoji_count(text) > 0 {
        profile.style.emoji_usage += 1;
    }
    if text.contains('?') {
        profile.style.question_frequency += 1;
    }

    // Persuasion indicators: one exposure per technique per message.
    for (technique, indicators) in PERSUASION_INDICATORS {
        if kw_match(&msg_lower, indicators) {
            profile
                .persuasion_responses
                .entry(technique.to_string())
                .or_default()
                .exposures += 1;
        }
    }

    // Engagement: message count plus a bounded response-time sample.
    if let Some(last) = profile.engagement.last_message_at {
        let delta = (now - last).num_seconds();
        if delta > 0 && delta <= RESPONSE_TIME_MAX_SECS {
            profile.engagement.total_response_secs += delta as u64;
            profile.engagement.response_samples += 1;
            profile.engagement.average_response_secs = profile.engagement.total_response_secs
                as f64
                / profile.engagement.response_samples as f64;
        } else {
            debug!("discarding out-of-range response delta: {delta}s");
        }
    }
    profile.engagement.message_count += 1;
    profile.engagement.last_message_at = Some(now);

    // Ring buffer: substantive statements only.
    if text.trim().chars().count() >= min_statement_len {
        profile.push_statement(text.trim(), now);
    }
}

/// Fold the user's reaction to the last injected persuasion technique
/// back into both profiles, then clear the pending marker.
///
/// This closes the learn → adapt → re-learn loop: an exposure was
/// recorded when the technique was injected; the sentiment of the next
/// inbound message decides whether it counted as a success.
pub(crate) fn fold_technique_feedback(
    conv: &mut ConversationProfile,
    learn: &mut LearningProfile,
    msg_lower: &str,
) {
    let Some(technique) = conv.last_technique.take() else {
        return;
    };
    let prior = rapport_core::profile::technique_prior(&technique);
    match classify_sentiment(msg_lower) {
        Sentiment::Positive => {
            conv.approach_mut(&technique).record_success(prior);
            learn
                .persuasion_responses
                .entry(technique.clone())
                .or_default()
                .positive_responses += 1;
            debug!("technique {technique} drew a positive response");
        }
        Sentiment::Negative => {
            learn
                .persuasion_responses
                .entry(technique.clone())
                .or_default()
                .negative_responses += 1;
            debug!("technique {technique} drew a negative response");
        }
        Sentiment::Neutral => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rapport_core::profile::PreferenceState;

    fn observed(text: &str) -> LearningProfile {
        let mut profile = LearningProfile::default();
        observe(&mut profile, text, Utc::now(), 12);
        profile
    }

    #[test]
    fn test_empty_input_changes_nothing() {
        let mut profile = LearningProfile::default();
        let before = serde_json::to_string(&profile).unwrap();
        observe(&mut profile, "", Utc::now(), 12);
        observe(&mut profile, "   ", Utc::now(), 12);
        let after = serde_json::to_string(&profile).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_join_signal_sets_status() {
        let profile = observed("hey, i joined the group just now!");
        assert_eq!(profile.join_status, JoinStatus::Joined);
    }

    #[test]
    fn test_decline_wins_over_join_in_same_message() {
        let profile = observed("i joined nothing, not interested");
        assert_eq!(profile.join_status, JoinStatus::NotJoined);
    }

    #[test]
    fn test_maybe_does_not_flip_not_joined() {
        let mut profile = LearningProfile::default();
        observe(&mut profile, "no thanks, not interested", Utc::now(), 12);
        assert_eq!(profile.join_status, JoinStatus::NotJoined);
        observe(&mut profile, "maybe", Utc::now(), 12);
        assert_eq!(profile.join_status, JoinStatus::NotJoined);
    }

    #[test]
    fn test_decline_marks_link_preference() {
        let profile = observed("no thanks, don't send the link");
        let signal = &profile.preferences["group_link_interest"];
        assert_eq!(signal.state, PreferenceState::Declined);
        assert!(signal.count >= 1);
    }

    #[test]
    fn test_topic_counted_once_per_message() {
        let profile = observed("bitcoin bitcoin bitcoin and ethereum all day");
        assert_eq!(profile.topics["crypto"], 1);
    }

    #[test]
    fn test_multiple_topics_in_one_message() {
        let profile = observed("i hit the gym then watched a movie");
        assert_eq!(profile.topics["fitness"], 1);
        assert_eq!(profile.topics["movies"], 1);
    }

    #[test]
    fn test_sentiment_single_increment() {
        let profile = observed("this is great, awesome, amazing, love it");
        assert_eq!(profile.sentiment.positive, 1);
        assert_eq!(profile.sentiment.negative, 0);
        assert_eq!(profile.sentiment.neutral, 0);
    }

    #[test]
    fn test_style_counters() {
        let profile = observed("lol yeah gonna check it out 🎉 you think so?");
        assert_eq!(profile.style.casual, 1);
        assert_eq!(profile.style.formal, 0);
        assert_eq!(profile.style.emoji_usage, 1);
        assert_eq!(profile.style.question_frequency, 1);
    }

    #[test]
    fn test_greeting_counted_from_first_token_only() {
        let profile = observed("hey, long time no see");
        assert_eq!(profile.style.greetings, 1);
        let profile = observed("they said hi to me yesterday");
        assert_eq!(profile.style.greetings, 0);
    }

    #[test]
    fn test_short_statement_not_buffered() {
        let profile = observed("ok");
        assert!(profile.recent_statements.is_empty());
        let profile = observed("that sounds like a genuinely interesting plan");
        assert_eq!(profile.recent_statements.len(), 1);
    }

    #[test]
    fn test_response_time_window() {
        let t0 = Utc::now();
        let mut profile = LearningProfile::default();
        observe(&mut profile, "first message here", t0, 12);
        // 30s later: valid sample.
        observe(&mut profile, "second message here", t0 + Duration::seconds(30), 12);
        assert_eq!(profile.engagement.response_samples, 1);
        assert_eq!(profile.engagement.total_response_secs, 30);
        // Two hours later: discarded.
        observe(&mut profile, "way later message", t0 + Duration::seconds(7800), 12);
        assert_eq!(profile.engagement.response_samples, 1);
        assert_eq!(profile.engagement.message_count, 3);
        assert_eq!(profile.engagement.average_response_secs, 30.0);
    }

    #[test]
    fn test_persuasion_indicator_records_exposure() {
        let profile = observed("wow everyone is talking about this");
        assert_eq!(profile.persuasion_responses["social_proof"].exposures, 1);
    }

    #[test]
    fn test_feedback_fold_updates_effectiveness() {
        let now = Utc::now();
        let mut conv = ConversationProfile::new("u1", now);
        let mut learn = LearningProfile::default();

        conv.approach_mut("scarcity").record_use(0.55);
        conv.last_technique = Some("scarcity".to_string());

        fold_technique_feedback(&mut conv, &mut learn, "that sounds great, love it");
        let stats = &conv.persuasion_approaches["scarcity"];
        assert_eq!(stats.uses, 1);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.effectiveness, 1.0);
        assert_eq!(learn.persuasion_responses["scarcity"].positive_responses, 1);
        assert!(conv.last_technique.is_none());

        // No pending technique: a second fold is a no-op.
        fold_technique_feedback(&mut conv, &mut learn, "awesome");
        assert_eq!(conv.persuasion_approaches["scarcity"].successes, 1);
    }
}
