//! Per-user durable state: conversation profile, cumulative learning
//! profile, and the onboarding state machine.
//!
//! All shapes here are the JSON documents persisted by the store, keyed
//! by user id within the `sessions`, `learning`, and `onboarding` tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Maximum entries in the recent-statements ring buffer.
pub const RECENT_STATEMENTS_MAX: usize = 15;

/// Named persuasion techniques tracked per user, with the neutral prior
/// used for `effectiveness` before any recorded use.
pub const TECHNIQUES: &[(&str, f64)] = &[
    ("social_proof", 0.6),
    ("scarcity", 0.55),
    ("reciprocity", 0.65),
    ("authority", 0.5),
    ("liking", 0.7),
    ("commitment", 0.6),
];

/// Neutral prior for a technique, 0.5 when the technique is unknown.
pub fn technique_prior(name: &str) -> f64 {
    TECHNIQUES
        .iter()
        .find(|(t, _)| *t == name)
        .map(|(_, p)| *p)
        .unwrap_or(0.5)
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One exchange entry in the capped history window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Five bounded personality dials, each in `[1, 10]`.
///
/// Initialized once per profile and mutated only through [`evolve`],
/// which clamps every shift back into range.
///
/// [`evolve`]: PersonalityTraits::evolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalityTraits {
    pub friendliness: u8,
    pub enthusiasm: u8,
    pub formality: u8,
    pub persuasiveness: u8,
    pub directness: u8,
}

impl Default for PersonalityTraits {
    fn default() -> Self {
        Self {
            friendliness: 7,
            enthusiasm: 6,
            formality: 4,
            persuasiveness: 6,
            directness: 5,
        }
    }
}

/// Signed shifts applied to personality traits by an evolution pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraitShift {
    pub friendliness: i8,
    pub enthusiasm: i8,
    pub formality: i8,
    pub persuasiveness: i8,
    pub directness: i8,
}

impl PersonalityTraits {
    fn clamp(value: i16) -> u8 {
        value.clamp(1, 10) as u8
    }

    /// Apply a shift, clamping every trait into `[1, 10]`.
    pub fn evolve(&mut self, shift: TraitShift) {
        self.friendliness = Self::clamp(self.friendliness as i16 + shift.friendliness as i16);
        self.enthusiasm = Self::clamp(self.enthusiasm as i16 + shift.enthusiasm as i16);
        self.formality = Self::clamp(self.formality as i16 + shift.formality as i16);
        self.persuasiveness = Self::clamp(self.persuasiveness as i16 + shift.persuasiveness as i16);
        self.directness = Self::clamp(self.directness as i16 + shift.directness as i16);
    }
}

/// Per-technique outcome tracking on the conversation profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproachStats {
    pub uses: u32,
    pub successes: u32,
    /// `successes / uses` when `uses > 0`, otherwise the technique prior.
    pub effectiveness: f64,
}

impl ApproachStats {
    pub fn with_prior(prior: f64) -> Self {
        Self {
            uses: 0,
            successes: 0,
            effectiveness: prior,
        }
    }

    fn recompute(&mut self, prior: f64) {
        self.effectiveness = if self.uses > 0 {
            self.successes as f64 / self.uses as f64
        } else {
            prior
        };
    }

    /// Record one exposure of this technique to the user.
    pub fn record_use(&mut self, prior: f64) {
        self.uses += 1;
        self.recompute(prior);
    }

    /// Record a positive response to a prior exposure.
    pub fn record_success(&mut self, prior: f64) {
        self.successes += 1;
        self.recompute(prior);
    }
}

/// The durable root entity: one per user identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationProfile {
    pub user_id: String,
    /// Ordered turns, capped at the configured window.
    pub history: Vec<Turn>,
    pub personality: PersonalityTraits,
    /// Topic tag → occurrence count, monotonically non-decreasing.
    pub topic_interests: HashMap<String, u32>,
    pub persuasion_approaches: HashMap<String, ApproachStats>,
    /// Technique injected into the last outbound reply, awaiting the
    /// user's reaction. Cleared once feedback is folded in.
    #[serde(default)]
    pub last_technique: Option<String>,
    pub last_active_at: DateTime<Utc>,
}

impl ConversationProfile {
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        let mut persuasion_approaches = HashMap::new();
        for (name, prior) in TECHNIQUES {
            persuasion_approaches.insert(name.to_string(), ApproachStats::with_prior(*prior));
        }
        Self {
            user_id: user_id.to_string(),
            history: Vec::new(),
            personality: PersonalityTraits::default(),
            topic_interests: HashMap::new(),
            persuasion_approaches,
            last_technique: None,
            last_active_at: now,
        }
    }

    /// Append a turn, evicting the oldest entries beyond `window`.
    ///
    /// The most recent exchange is always preserved: the window never
    /// shrinks below two entries even when configured smaller.
    pub fn append_turn(&mut self, role: Role, content: &str, now: DateTime<Utc>, window: usize) {
        self.history.push(Turn {
            role,
            content: content.to_string(),
            timestamp: now,
        });
        let keep = window.max(2);
        while self.history.len() > keep {
            self.history.remove(0);
        }
        self.last_active_at = now;
    }

    /// Bump a topic counter (monotonic).
    pub fn note_topic(&mut self, topic: &str) {
        *self.topic_interests.entry(topic.to_string()).or_insert(0) += 1;
    }

    /// Stats entry for a technique, created with its prior on first touch.
    pub fn approach_mut(&mut self, technique: &str) -> &mut ApproachStats {
        self.persuasion_approaches
            .entry(technique.to_string())
            .or_insert_with(|| ApproachStats::with_prior(technique_prior(technique)))
    }
}

/// Declared state of a named preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceState {
    Accepted,
    Declined,
}

/// A preference with how many times it has been re-declared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceSignal {
    pub state: PreferenceState,
    pub count: u32,
}

/// Whether the user has given an explicit join/not-join signal.
/// Last-write-wins; never inferred from ambiguous phrasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    #[default]
    Unknown,
    Joined,
    NotJoined,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentimentCounts {
    pub positive: u32,
    pub negative: u32,
    pub neutral: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleCounts {
    pub formal: u32,
    pub casual: u32,
    /// Messages opening with a greeting token.
    pub greetings: u32,
    /// Messages containing at least one emoji.
    pub emoji_usage: u32,
    /// Messages containing at least one question mark.
    pub question_frequency: u32,
}

/// Per-technique response tracking on the learning side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechniqueResponse {
    pub exposures: u32,
    pub positive_responses: u32,
    pub negative_responses: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub message_count: u64,
    pub total_response_secs: u64,
    /// Messages that contributed a valid response-time delta.
    pub response_samples: u64,
    pub average_response_secs: f64,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentStatement {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Cumulative behavioral profile, append-mostly, never pruned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningProfile {
    pub preferences: HashMap<String, PreferenceSignal>,
    /// Topic tag → count, derived from raw text independently of the
    /// conversation profile's topic interests.
    pub topics: HashMap<String, u32>,
    /// Ring buffer of substantive statements, capped at
    /// [`RECENT_STATEMENTS_MAX`].
    pub recent_statements: VecDeque<RecentStatement>,
    pub sentiment: SentimentCounts,
    pub style: StyleCounts,
    pub persuasion_responses: HashMap<String, TechniqueResponse>,
    pub engagement: EngagementMetrics,
    pub join_status: JoinStatus,
}

impl LearningProfile {
    /// Record a statement, dropping the oldest beyond the ring capacity.
    pub fn push_statement(&mut self, text: &str, timestamp: DateTime<Utc>) {
        self.recent_statements.push_back(RecentStatement {
            text: text.to_string(),
            timestamp,
        });
        while self.recent_statements.len() > RECENT_STATEMENTS_MAX {
            self.recent_statements.pop_front();
        }
    }

    /// Mark a preference as declined, bumping its recurrence count.
    pub fn decline(&mut self, preference: &str) {
        let entry = self
            .preferences
            .entry(preference.to_string())
            .or_insert(PreferenceSignal {
                state: PreferenceState::Declined,
                count: 0,
            });
        entry.state = PreferenceState::Declined;
        entry.count += 1;
    }

    /// Average emoji density across observed messages, in `[0, 1]`.
    pub fn emoji_density(&self) -> f64 {
        if self.engagement.message_count == 0 {
            return 0.0;
        }
        self.style.emoji_usage as f64 / self.engagement.message_count as f64
    }

    /// Mean length of buffered statements, `None` while the buffer is empty.
    pub fn average_statement_len(&self) -> Option<f64> {
        if self.recent_statements.is_empty() {
            return None;
        }
        let total: usize = self
            .recent_statements
            .iter()
            .map(|s| s.text.chars().count())
            .sum();
        Some(total as f64 / self.recent_statements.len() as f64)
    }
}

/// Stages of the onboarding state machine. Forward-only, except for the
/// inactivity reset back to `New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    New,
    Welcomed,
    Followup1,
    Followup2,
    Followup3,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::New => "new",
            Stage::Welcomed => "welcomed",
            Stage::Followup1 => "followup_1",
            Stage::Followup2 => "followup_2",
            Stage::Followup3 => "followup_3",
            Stage::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Stage::New),
            "welcomed" => Some(Stage::Welcomed),
            "followup_1" => Some(Stage::Followup1),
            "followup_2" => Some(Stage::Followup2),
            "followup_3" => Some(Stage::Followup3),
            "completed" => Some(Stage::Completed),
            _ => None,
        }
    }

    /// The reminder stage that follows this one, if any.
    pub fn next_followup(&self) -> Option<Stage> {
        match self {
            Stage::Welcomed => Some(Stage::Followup1),
            Stage::Followup1 => Some(Stage::Followup2),
            Stage::Followup2 => Some(Stage::Followup3),
            _ => None,
        }
    }

    /// The stage a scheduled reminder expects to find when it fires.
    /// A mismatch means the timer is stale.
    pub fn expected_predecessor(&self) -> Option<Stage> {
        match self {
            Stage::Followup1 => Some(Stage::Welcomed),
            Stage::Followup2 => Some(Stage::Followup1),
            Stage::Followup3 => Some(Stage::Followup2),
            _ => None,
        }
    }
}

/// Drives the follow-up scheduler. One per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingState {
    pub stage: Stage,
    /// Onboarding cycle number; bumped on every inactivity reset so
    /// timers from an earlier cycle can be recognized as stale.
    #[serde(default)]
    pub cycle: u32,
    pub welcomed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OnboardingState {
    pub fn new() -> Self {
        Self {
            stage: Stage::New,
            cycle: 0,
            welcomed_at: None,
            completed_at: None,
        }
    }

    /// Inactivity reset: back to `New`, welcome marker cleared, cycle
    /// bumped. Completed users never reset.
    pub fn reset_for_new_cycle(&mut self) {
        if self.stage == Stage::Completed {
            return;
        }
        self.stage = Stage::New;
        self.cycle += 1;
        self.welcomed_at = None;
    }
}

impl Default for OnboardingState {
    fn default() -> Self {
        Self::new()
    }
}
