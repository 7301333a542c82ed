//! Token counting.
//!
//! The inference backend may report its own usage; when it does not, and for
//! every token-efficiency computation, a [`TokenCounter`] estimates the count.

/// Something that can count tokens in a text
pub trait TokenCounter {
    /// Number of tokens in `text`
    fn count(&self, text: &str) -> usize;
}

/// Word-length bucketed estimator.
///
/// Words of up to 3 characters are one token, up to 8 characters `len / 4`,
/// longer words `len / 3.5` (all rounded up). Each punctuation-only unit adds
/// a quarter token. Any non-empty text counts as at least one token.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl HeuristicTokenCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TokenCounter for HeuristicTokenCounter {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn count(&self, text: &str) -> usize {
        if text.trim().is_empty() {
            return 0;
        }

        let mut total = 0.0_f64;
        for unit in units(text) {
            match unit {
                Unit::Word(len) => total += word_tokens(len),
                Unit::Punctuation => total += 0.25,
            }
        }

        (total.ceil() as usize).max(1)
    }
}

enum Unit {
    Word(usize),
    Punctuation,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\''
}

/// Split text into word runs and punctuation runs
fn units(text: &str) -> Vec<Unit> {
    let mut out = Vec::new();
    for chunk in text.split_whitespace() {
        let mut word_len = 0usize;
        let mut in_punct = false;
        for c in chunk.chars() {
            if is_word_char(c) {
                if in_punct {
                    out.push(Unit::Punctuation);
                    in_punct = false;
                }
                word_len += 1;
            } else {
                if word_len > 0 {
                    out.push(Unit::Word(word_len));
                    word_len = 0;
                }
                in_punct = true;
            }
        }
        if word_len > 0 {
            out.push(Unit::Word(word_len));
        }
        if in_punct {
            out.push(Unit::Punctuation);
        }
    }
    out
}

#[allow(clippy::cast_precision_loss)]
fn word_tokens(len: usize) -> f64 {
    let len_f = len as f64;
    match len {
        0 => 0.0,
        1..=3 => 1.0,
        4..=8 => (len_f / 4.0).ceil(),
        _ => (len_f / 3.5).ceil(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_has_no_tokens() {
        let counter = HeuristicTokenCounter::new();
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("   \n\t"), 0);
    }

    #[test]
    fn test_short_words_are_single_tokens() {
        let counter = HeuristicTokenCounter::new();
        assert_eq!(counter.count("go up now"), 3);
    }

    #[test]
    fn test_word_length_buckets() {
        let counter = HeuristicTokenCounter::new();
        // 8 chars -> ceil(8/4) = 2
        assert_eq!(counter.count("schedule"), 2);
        // 10 chars -> ceil(10/3.5) = 3
        assert_eq!(counter.count("cardiology"), 3);
        // 5 chars -> ceil(5/4) = 2
        assert_eq!(counter.count("north"), 2);
    }

    #[test]
    fn test_punctuation_adds_quarter_tokens() {
        let counter = HeuristicTokenCounter::new();
        // "ok" = 1, "!" = 0.25 -> ceil(1.25) = 2
        assert_eq!(counter.count("ok !"), 2);
        // four punctuation units -> exactly 1 + 1
        assert_eq!(counter.count("ok . . . ."), 2);
    }

    #[test]
    fn test_punctuation_only_text_is_at_least_one_token() {
        let counter = HeuristicTokenCounter::new();
        assert_eq!(counter.count("?"), 1);
    }

    #[test]
    fn test_booking_confirmation_estimate() {
        let counter = HeuristicTokenCounter::new();
        // words: 3+3+1+1+2+1+1 = 12, punctuation: 5 * 0.25 -> 13.25 -> 14
        let count = counter.count("Confirmed: Cardiology, Tue 3pm. Booking ID: #C001");
        assert_eq!(count, 14);
    }
}
