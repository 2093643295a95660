//! Outbound message chunking and human-like pacing.
//!
//! Long replies are split into at most two parts at a natural boundary,
//! and each part gets a typing delay proportional to its length with
//! random jitter, clamped into a configured band.

use rand::Rng;
use rapport_core::config::ChunkingConfig;
use std::time::Duration;

/// Split a reply into at most two parts.
///
/// Texts within the single-part limit pass through untouched. Longer
/// texts split at the sentence boundary nearest the midpoint, falling
/// back to the nearest whitespace. Never splits mid-word; a text with no
/// split point at all is sent as one oversized part.
pub(crate) fn chunk(text: &str, single_part_max: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= single_part_max {
        return vec![text.to_string()];
    }

    let split = sentence_split_near_midpoint(text)
        .or_else(|| whitespace_split_near_midpoint(text));
    match split {
        Some(at) => {
            let head = text[..at].trim_end();
            let tail = text[at..].trim_start();
            if head.is_empty() || tail.is_empty() {
                vec![text.to_string()]
            } else {
                vec![head.to_string(), tail.to_string()]
            }
        }
        None => vec![text.to_string()],
    }
}

/// Byte offset just past the sentence terminator closest to the middle.
fn sentence_split_near_midpoint(text: &str) -> Option<usize> {
    let midpoint = text.len() / 2;
    text.char_indices()
        .filter(|(i, c)| {
            matches!(c, '.' | '!' | '?')
                && text[i + c.len_utf8()..]
                    .chars()
                    .next()
                    .map(|next| next.is_whitespace())
                    .unwrap_or(false)
        })
        .map(|(i, c)| i + c.len_utf8())
        .min_by_key(|i| i.abs_diff(midpoint))
}

fn whitespace_split_near_midpoint(text: &str) -> Option<usize> {
    let midpoint = text.len() / 2;
    text.char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(i, _)| i)
        .min_by_key(|i| i.abs_diff(midpoint))
}

/// Pre-send delay for each part: characters over typing speed, jittered,
/// clamped into the configured band. Parts after the first also carry
/// the inter-message gap, jittered the same way.
pub(crate) fn pace<R: Rng>(parts: &[String], config: &ChunkingConfig, rng: &mut R) -> Vec<Duration> {
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let chars = part.chars().count() as u64;
            let base_ms = if config.chars_per_sec == 0 {
                0
            } else {
                chars * 1000 / config.chars_per_sec as u64
            };
            let jittered = apply_jitter(base_ms, config.jitter_pct, rng);
            let mut delay = jittered.clamp(config.min_delay_ms, config.max_delay_ms);
            if i > 0 {
                delay += apply_jitter(config.inter_message_gap_ms, config.jitter_pct, rng);
            }
            Duration::from_millis(delay)
        })
        .collect()
}

/// Scale a delay by a random factor in `[1 - pct, 1 + pct]`.
fn apply_jitter<R: Rng>(base_ms: u64, jitter_pct: u32, rng: &mut R) -> u64 {
    if jitter_pct == 0 || base_ms == 0 {
        return base_ms;
    }
    let spread = base_ms * jitter_pct as u64 / 100;
    let low = base_ms.saturating_sub(spread);
    let high = base_ms + spread;
    rng.gen_range(low..=high)
}
