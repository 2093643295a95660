//! Fixed keyword tables driving the learning engine.
//!
//! All matching is case-insensitive against a pre-lowercased message.
//! Multi-word phrases use substring matching; single short words are
//! matched token-wise to avoid false hits inside longer words.

/// Explicit "I joined" signals. Only these flip join status to Joined.
pub(crate) const JOIN_PHRASES: &[&str] = &[
    "i joined",
    "just joined",
    "i'm in the group",
    "im in the group",
    "i am in the group",
    "i did join",
    "joined the group",
    "already joined",
];

/// Explicit decline signals. Checked before join phrases; a decline in
/// the same message wins.
pub(crate) const DECLINE_PHRASES: &[&str] = &[
    "not interested",
    "no thanks",
    "no thank you",
    "don't want",
    "dont want",
    "not joining",
    "won't join",
    "wont join",
    "not going to join",
    "stop sending",
    "leave me alone",
];

/// Decline signals for the invite link specifically.
pub(crate) const LINK_DECLINE_PHRASES: &[&str] = &[
    "don't send the link",
    "dont send the link",
    "no link",
    "stop with the link",
    "not interested in the link",
    "don't need the link",
];

/// Greeting tokens, matched against the first word of a message.
pub(crate) const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "yo", "sup", "howdy", "hiya", "greetings",
];

/// Topic keywords mapped to topic tags (~40 keywords, 10 tags).
pub(crate) const TOPIC_KEYWORDS: &[(&str, &str)] = &[
    ("bitcoin", "crypto"),
    ("ethereum", "crypto"),
    ("crypto", "crypto"),
    ("token", "crypto"),
    ("gym", "fitness"),
    ("workout", "fitness"),
    ("exercise", "fitness"),
    ("running", "fitness"),
    ("music", "music"),
    ("song", "music"),
    ("concert", "music"),
    ("playlist", "music"),
    ("movie", "movies"),
    ("film", "movies"),
    ("netflix", "movies"),
    ("series", "movies"),
    ("game", "gaming"),
    ("gaming", "gaming"),
    ("playstation", "gaming"),
    ("xbox", "gaming"),
    ("food", "food"),
    ("cooking", "food"),
    ("recipe", "food"),
    ("restaurant", "food"),
    ("travel", "travel"),
    ("trip", "travel"),
    ("vacation", "travel"),
    ("flight", "travel"),
    ("job", "work"),
    ("office", "work"),
    ("boss", "work"),
    ("career", "work"),
    ("family", "family"),
    ("kids", "family"),
    ("parents", "family"),
    ("wedding", "family"),
    ("football", "sports"),
    ("basketball", "sports"),
    ("soccer", "sports"),
    ("tennis", "sports"),
];

pub(crate) const POSITIVE_WORDS: &[&str] = &[
    "great", "awesome", "love", "nice", "cool", "amazing", "perfect", "thanks",
    "thank", "happy", "excellent", "fantastic", "wonderful", "glad",
];

pub(crate) const NEGATIVE_WORDS: &[&str] = &[
    "bad", "hate", "annoying", "terrible", "awful", "boring", "angry", "sad",
    "worst", "horrible", "stupid", "useless", "frustrated",
];

pub(crate) const FORMAL_MARKERS: &[&str] = &[
    "dear",
    "regards",
    "kindly",
    "would you",
    "could you please",
    "thank you very much",
    "i appreciate",
    "sincerely",
];

pub(crate) const CASUAL_MARKERS: &[&str] = &[
    "lol", "haha", "btw", "omg", "gonna", "wanna", "yeah", "nah", "bro", "dude",
    "lmao", "tbh",
];

/// Indicator words suggesting the user is reacting to a persuasion
/// technique, keyed by technique tag.
pub(crate) const PERSUASION_INDICATORS: &[(&str, &[&str])] = &[
    ("social_proof", &["everyone", "everybody", "others are", "people are"]),
    ("scarcity", &["limited", "running out", "last chance", "miss out"]),
    ("reciprocity", &["thanks for", "appreciate", "grateful", "you helped"]),
    ("authority", &["expert", "official", "verified", "proof"]),
    ("liking", &["you're nice", "youre nice", "like you", "you're fun"]),
    ("commitment", &["i promise", "i will", "count me in", "i'll do it"]),
];

/// True if any keyword appears as a substring of the lowercased message.
pub(crate) fn kw_match(msg_lower: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| msg_lower.contains(kw))
}

/// True if the token appears as a standalone word.
pub(crate) fn word_match(msg_lower: &str, word: &str) -> bool {
    msg_lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|t| t == word)
}

/// True if the message opens with a greeting token.
pub(crate) fn is_greeting(msg_lower: &str) -> bool {
    msg_lower
        .split(|c: char| !c.is_alphanumeric())
        .find(|t| !t.is_empty())
        .map(|first| GREETINGS.contains(&first))
        .unwrap_or(false)
}

/// Emoji detection over the common pictographic blocks.
pub(crate) fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F300..=0x1F5FF   // symbols & pictographs
        | 0x1F600..=0x1F64F // emoticons
        | 0x1F680..=0x1F6FF // transport & map
        | 0x1F900..=0x1F9FF // supplemental symbols
        | 0x2600..=0x27BF   // misc symbols, dingbats
        | 0x1FA70..=0x1FAFF
    )
}

/// Count emoji characters in a text.
pub(crate) fn emoji_count(text: &str) -> usize {
    text.chars().filter(|c| is_emoji(*c)).count()
}
