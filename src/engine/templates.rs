//! Template registry — the single source of every canned phrase the
//! engine sends, keyed by onboarding stage, topic tag, or persuasion
//! technique. Pools are small (3-5 entries) and picked at random so the
//! bot never repeats itself verbatim.

use rand::Rng;
use rapport_core::profile::Stage;

/// Placeholder substituted with the configured invite link.
pub(crate) const GROUP_LINK_PLACEHOLDER: &str = "{group_link}";

const WELCOME: &[&str] = &[
    "Hey! Great to hear from you. We've got a group going that I think you'd really enjoy — here's your invite: {group_link}. Reply DONE once you're in!",
    "Hi there! Glad you reached out. Come hang out with the rest of us: {group_link} — just reply DONE when you've joined.",
    "Welcome! The conversation really happens in the group — grab your spot here: {group_link}. Let me know with a quick DONE once you're set.",
    "Hey, good timing! We're gathering everyone in one place: {group_link}. Jump in and reply DONE so I know you made it.",
];

const FOLLOWUP_1: &[&str] = &[
    "Just checking in — did you get a chance to join yet? No rush, the invite's still good.",
    "Hey again! The group link is waiting whenever you're ready. Reply DONE once you're in.",
    "Friendly nudge — people are already chatting in there. Your invite still works!",
];

const FOLLOWUP_2: &[&str] = &[
    "Haven't seen you in the group yet — it only takes a few seconds to join. Want me to resend the link?",
    "Quick reminder: the group is where everything happens. Joining takes one tap — reply DONE when you're in.",
    "Still saving your spot! Jump in when you can and send me a DONE.",
];

const FOLLOWUP_3: &[&str] = &[
    "Last call from me — I'd hate for you to miss what's going on in the group. The invite is still open if you want in.",
    "This is my final nudge, promise! The group's moving fast and your spot is still there. Reply DONE if you make it in.",
    "I'll stop bugging you after this one — the door's open whenever you're ready.",
];

const COMPLETION_ACK: &[&str] = &[
    "Amazing, you're in! 🎉 Glad to have you — say hi in the group whenever you like.",
    "Perfect, welcome aboard! You'll get the hang of the group in no time.",
    "Got it — you're all set! Great to have you with us.",
];

const FALLBACK: &[&str] = &[
    "Good question — let me get back to you on that in a bit!",
    "Hmm, I want to give you a proper answer on that one. Give me a little while?",
    "I'm a bit swamped right now, but I didn't want to leave you hanging — more soon!",
];

const EMPATHY_PREFIX: &[&str] = &[
    "I hear you — ",
    "That sounds rough. ",
    "Totally understandable. ",
];

/// One reinforcement sentence per topic tag.
const TOPIC_LINES: &[(&str, &[&str])] = &[
    ("crypto", &[
        "By the way, there's been some great crypto chat in the group lately.",
        "You'd probably enjoy the market threads people share in there.",
    ]),
    ("fitness", &[
        "A few folks in the group trade workout plans too, by the way.",
        "There's a running crew forming in the group — figured you'd want to know.",
    ]),
    ("music", &[
        "Someone drops a killer playlist in the group most weeks, just saying.",
        "The group has strong music taste — you'd fit right in.",
    ]),
    ("movies", &[
        "Movie night picks get debated in the group all the time, by the way.",
        "There's a whole thread of film recommendations in the group.",
    ]),
    ("gaming", &[
        "A bunch of the group plays together in the evenings, by the way.",
        "You'd like the gaming corner of the group, I think.",
    ]),
    ("food", &[
        "People swap recipes in the group constantly — dangerous for the appetite.",
        "The group's restaurant tips alone are worth it, honestly.",
    ]),
    ("travel", &[
        "Half the group seems to be planning a trip at any given time.",
        "There are some great travel stories floating around the group.",
    ]),
    ("work", &[
        "Plenty of people in the group talk shop too — good connections there.",
        "The group's had some useful career threads lately.",
    ]),
    ("family", &[
        "It's a friendly crowd in the group — lots of family folks like you.",
        "The group keeps things wholesome, you'd like the vibe.",
    ]),
    ("sports", &[
        "Match days get lively in the group, fair warning.",
        "There's always a score being argued about in the group.",
    ]),
];

/// One injectable phrase per persuasion technique.
const PERSUASION_LINES: &[(&str, &[&str])] = &[
    ("social_proof", &[
        "Most people who got this invite have already joined.",
        "Everyone's been jumping in this week — you'd be in good company.",
    ]),
    ("scarcity", &[
        "Spots won't stay open forever, just so you know.",
        "The invite window closes soon, so don't sit on it too long.",
    ]),
    ("reciprocity", &[
        "I made sure to save you a spot, by the way.",
        "I put in a word for you already, so you're expected!",
    ]),
    ("authority", &[
        "The group is run by people who really know their stuff.",
        "It's a verified community — no spam, just the real thing.",
    ]),
    ("liking", &[
        "Honestly, I think you'd get along great with everyone in there.",
        "You're exactly the kind of person the group enjoys having around.",
    ]),
    ("commitment", &[
        "You mentioned you'd take a look — the link's ready when you are.",
        "Small step, big payoff: one tap and you're in.",
    ]),
];

/// Pick one entry from a pool at random.
fn pick<'a, R: Rng>(pool: &[&'a str], rng: &mut R) -> &'a str {
    pool[rng.gen_range(0..pool.len())]
}

/// Message pool for an onboarding stage. `New` and `Completed` have no
/// reminder pool.
fn stage_pool(stage: Stage) -> &'static [&'static str] {
    match stage {
        Stage::Welcomed => WELCOME,
        Stage::Followup1 => FOLLOWUP_1,
        Stage::Followup2 => FOLLOWUP_2,
        Stage::Followup3 => FOLLOWUP_3,
        Stage::New | Stage::Completed => &[],
    }
}

/// Welcome message with the invite link resolved.
pub(crate) fn welcome<R: Rng>(group_link: &str, rng: &mut R) -> String {
    pick(WELCOME, rng).replace(GROUP_LINK_PLACEHOLDER, group_link)
}

/// Reminder message for a follow-up stage, link resolved. `None` for
/// stages without a reminder pool.
pub(crate) fn reminder<R: Rng>(stage: Stage, group_link: &str, rng: &mut R) -> Option<String> {
    let pool = stage_pool(stage);
    if pool.is_empty() {
        return None;
    }
    Some(pick(pool, rng).replace(GROUP_LINK_PLACEHOLDER, group_link))
}

pub(crate) fn completion_ack<R: Rng>(rng: &mut R) -> String {
    pick(COMPLETION_ACK, rng).to_string()
}

/// Static reply used when the completion capability fails or times out.
pub(crate) fn fallback_reply<R: Rng>(rng: &mut R) -> String {
    pick(FALLBACK, rng).to_string()
}

pub(crate) fn empathy_prefix<R: Rng>(rng: &mut R) -> &'static str {
    pick(EMPATHY_PREFIX, rng)
}

/// Reinforcement sentence for a topic tag, if one is registered.
pub(crate) fn topic_line<R: Rng>(topic: &str, rng: &mut R) -> Option<&'static str> {
    TOPIC_LINES
        .iter()
        .find(|(t, _)| *t == topic)
        .map(|(_, pool)| pick(pool, rng))
}

/// Injectable phrase for a persuasion technique, if one is registered.
pub(crate) fn persuasion_line<R: Rng>(technique: &str, rng: &mut R) -> Option<&'static str> {
    PERSUASION_LINES
        .iter()
        .find(|(t, _)| *t == technique)
        .map(|(_, pool)| pick(pool, rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn test_every_welcome_carries_the_link_placeholder() {
        for template in WELCOME {
            assert!(template.contains(GROUP_LINK_PLACEHOLDER));
        }
        let msg = welcome("https://g.example/x", &mut thread_rng());
        assert!(msg.contains("https://g.example/x"));
        assert!(!msg.contains(GROUP_LINK_PLACEHOLDER));
    }

    #[test]
    fn test_reminder_pools_exist_for_followup_stages() {
        let mut rng = thread_rng();
        for stage in [Stage::Followup1, Stage::Followup2, Stage::Followup3] {
            assert!(reminder(stage, "link", &mut rng).is_some());
        }
        assert!(reminder(Stage::Completed, "link", &mut rng).is_none());
        assert!(reminder(Stage::New, "link", &mut rng).is_none());
    }

    #[test]
    fn test_pools_are_small_and_curated() {
        for pool in [WELCOME, FOLLOWUP_1, FOLLOWUP_2, FOLLOWUP_3, COMPLETION_ACK, FALLBACK] {
            assert!((3..=5).contains(&pool.len()), "pool size {}", pool.len());
        }
    }

    #[test]
    fn test_registry_covers_all_topics_and_techniques() {
        let mut rng = thread_rng();
        for (topic, _) in TOPIC_LINES {
            assert!(topic_line(topic, &mut rng).is_some());
        }
        for (technique, _) in PERSUASION_LINES {
            assert!(persuasion_line(technique, &mut rng).is_some());
        }
        assert!(topic_line("unknown", &mut rng).is_none());
    }
}
