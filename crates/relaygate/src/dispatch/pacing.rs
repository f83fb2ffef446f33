//! Humanized pacing: typing delays, inter-message pauses, sentence splitting.

use std::time::Duration;

use rand::Rng;

/// Pacing parameters for one dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    pub chars_per_second: u32,
    /// Ceiling on a single typing simulation.
    pub max_typing: Duration,
    pub pause_min: Duration,
    pub pause_max: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            chars_per_second: 16,
            max_typing: Duration::from_secs(15),
            pause_min: Duration::from_secs(5),
            pause_max: Duration::from_secs(8),
        }
    }
}

/// Simulated typing time for `text`: `min(ceil(len / rate) s, max_typing)`.
///
/// Length is counted in characters, not bytes.
pub fn typing_delay(text: &str, config: &PacingConfig) -> Duration {
    if config.chars_per_second == 0 {
        return config.max_typing;
    }
    let len = text.chars().count() as u64;
    let secs = len.div_ceil(u64::from(config.chars_per_second));
    Duration::from_secs(secs).min(config.max_typing)
}

/// Random pause between sends, uniform in `[pause_min, pause_max]`.
pub fn inter_message_pause(config: &PacingConfig) -> Duration {
    let min = config.pause_min.as_millis() as u64;
    let max = config.pause_max.as_millis() as u64;
    if max <= min {
        return config.pause_min;
    }
    Duration::from_millis(rand::rng().random_range(min..=max))
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…' | '。' | '！' | '？')
}

/// Terminators that end a sentence even without following whitespace.
fn is_wide_terminator(c: char) -> bool {
    matches!(c, '…' | '。' | '！' | '？')
}

fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '”' | '’' | '」' | '』')
}

/// Split text into sentences.
///
/// A sentence ends at a run of terminators (plus closing quotes/brackets)
/// followed by whitespace or end of text. Ellipsis and CJK full-width
/// terminators end a sentence on their own. Abbreviations are not special
/// cased, so `"Dr. Smith"` yields two segments. Segments are trimmed and
/// empty ones dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if !is_terminator(c) {
            continue;
        }

        let mut wide = is_wide_terminator(c);
        while let Some(&next) = chars.peek() {
            if is_terminator(next) || is_closing(next) {
                wide |= is_wide_terminator(next);
                current.push(next);
                chars.next();
            } else {
                break;
            }
        }

        let at_boundary = match chars.peek() {
            None => true,
            Some(next) => next.is_whitespace() || wide,
        };
        if at_boundary {
            push_segment(&mut segments, &mut current);
        }
    }
    push_segment(&mut segments, &mut current);

    segments
}

fn push_segment(segments: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(rate: u32) -> PacingConfig {
        PacingConfig {
            chars_per_second: rate,
            ..PacingConfig::default()
        }
    }

    // ------------------------------------------------------------------------
    // typing_delay
    // ------------------------------------------------------------------------

    #[test]
    fn test_typing_delay_exact_multiple() {
        let text = "x".repeat(96);
        assert_eq!(typing_delay(&text, &cfg(16)), Duration::from_millis(6000));
    }

    #[test]
    fn test_typing_delay_clamps_to_max() {
        let text = "x".repeat(400);
        assert_eq!(typing_delay(&text, &cfg(16)), Duration::from_millis(15000));
    }

    #[test]
    fn test_typing_delay_rounds_up() {
        assert_eq!(typing_delay("hi", &cfg(16)), Duration::from_secs(1));
        assert_eq!(typing_delay(&"x".repeat(17), &cfg(16)), Duration::from_secs(2));
        assert_eq!(typing_delay("", &cfg(16)), Duration::ZERO);
    }

    #[test]
    fn test_typing_delay_counts_chars_not_bytes() {
        // 16 chars, 32+ bytes
        let text = "çãéíóúâêôàüñöäëï";
        assert_eq!(text.chars().count(), 16);
        assert_eq!(typing_delay(text, &cfg(16)), Duration::from_secs(1));
    }

    #[test]
    fn test_typing_delay_zero_rate_uses_ceiling() {
        assert_eq!(typing_delay("hi", &cfg(0)), Duration::from_secs(15));
    }

    // ------------------------------------------------------------------------
    // inter_message_pause
    // ------------------------------------------------------------------------

    #[test]
    fn test_pause_within_bounds() {
        let config = PacingConfig::default();
        for _ in 0..200 {
            let pause = inter_message_pause(&config);
            assert!(pause >= Duration::from_secs(5));
            assert!(pause <= Duration::from_secs(8));
        }
    }

    #[test]
    fn test_pause_degenerate_range() {
        let config = PacingConfig {
            pause_min: Duration::ZERO,
            pause_max: Duration::ZERO,
            ..PacingConfig::default()
        };
        assert_eq!(inter_message_pause(&config), Duration::ZERO);
    }

    // ------------------------------------------------------------------------
    // split_sentences
    // ------------------------------------------------------------------------

    #[test]
    fn test_split_basic() {
        assert_eq!(
            split_sentences("Hi. How are you? Fine!"),
            vec!["Hi.", "How are you?", "Fine!"]
        );
    }

    #[test]
    fn test_split_abbreviation_not_special_cased() {
        assert_eq!(split_sentences("Dr. Smith"), vec!["Dr.", "Smith"]);
    }

    #[test]
    fn test_split_ellipsis() {
        assert_eq!(split_sentences("Olá… tudo bem?"), vec!["Olá…", "tudo bem?"]);
    }

    #[test]
    fn test_split_cjk() {
        assert_eq!(split_sentences("你好。再见！"), vec!["你好。", "再见！"]);
    }

    #[test]
    fn test_split_no_terminator() {
        assert_eq!(split_sentences("just one line"), vec!["just one line"]);
    }

    #[test]
    fn test_split_keeps_runs_and_quotes_together() {
        assert_eq!(
            split_sentences("Really?! She said \"no.\" Ok"),
            vec!["Really?!", "She said \"no.\"", "Ok"]
        );
    }

    #[test]
    fn test_split_decimal_not_a_boundary() {
        assert_eq!(split_sentences("Pi is 3.14 today."), vec!["Pi is 3.14 today."]);
    }

    #[test]
    fn test_split_blank() {
        assert!(split_sentences("   ").is_empty());
    }
}
