//! Normalization of Persian text before it enters a dataset

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DIACRITICS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\u{0610}-\u{061A}\u{064B}-\u{065F}\u{06D6}-\u{06ED}]")
        .expect("Invalid diacritics regex")
});

static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*([،؛,.!?؟])\s*").expect("Invalid punctuation regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

const TATWEEL: char = '\u{0640}';

/// ZWNJ and right-to-left mark
const ZERO_WIDTH: [char; 2] = ['\u{200C}', '\u{200F}'];

/// Which cleaning steps to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    pub remove_diacritics: bool,
    pub normalize_whitespace: bool,
    pub convert_arabic_chars: bool,
    pub standardize_digits: bool,
    pub remove_tatweel: bool,
    pub standardize_punctuation_spacing: bool,
    pub strip_zero_width_spaces: bool,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            remove_diacritics: true,
            normalize_whitespace: true,
            convert_arabic_chars: true,
            standardize_digits: true,
            remove_tatweel: true,
            standardize_punctuation_spacing: true,
            strip_zero_width_spaces: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PersianTextCleaner {
    config: CleaningConfig,
}

impl PersianTextCleaner {
    #[must_use]
    pub fn new(config: CleaningConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &CleaningConfig {
        &self.config
    }

    /// Normalized form of `text`.
    ///
    /// Steps run in a fixed order: letter unification, digits, diacritics,
    /// tatweel, zero-width characters, punctuation spacing, whitespace.
    #[must_use]
    pub fn clean(&self, text: &str) -> String {
        let config = &self.config;
        let mut cleaned: String = text
            .chars()
            .map(|c| {
                let c = if config.convert_arabic_chars {
                    persian_letter(c)
                } else {
                    c
                };
                if config.standardize_digits {
                    ascii_digit(c)
                } else {
                    c
                }
            })
            .collect();

        if config.remove_diacritics {
            cleaned = DIACRITICS.replace_all(&cleaned, "").into_owned();
        }
        if config.remove_tatweel {
            cleaned.retain(|c| c != TATWEEL);
        }
        if config.strip_zero_width_spaces {
            cleaned.retain(|c| !ZERO_WIDTH.contains(&c));
        }
        if config.standardize_punctuation_spacing {
            cleaned = PUNCTUATION
                .replace_all(&cleaned, "${1} ")
                .trim()
                .to_string();
        }
        if config.normalize_whitespace {
            cleaned = WHITESPACE.replace_all(&cleaned, " ").trim().to_string();
        }
        cleaned
    }
}

/// Arabic code points that have a distinct Persian form
fn persian_letter(c: char) -> char {
    match c {
        'ي' | 'ى' | 'ئ' => 'ی',
        'ك' => 'ک',
        'ؤ' => 'و',
        'إ' | 'أ' | 'ٱ' => 'ا',
        'ة' | 'ۀ' => 'ه',
        other => other,
    }
}

/// Arabic-Indic (U+0660..) and extended Persian (U+06F0..) digits
fn ascii_digit(c: char) -> char {
    let offset = match c {
        '\u{0660}'..='\u{0669}' => c as u32 - 0x0660,
        '\u{06F0}'..='\u{06F9}' => c as u32 - 0x06F0,
        _ => return c,
    };
    char::from_digit(offset, 10).unwrap_or(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pipeline() {
        let cleaner = PersianTextCleaner::default();
        assert_eq!(cleaner.clean("كِتاب\u{0640}هاى ١٢۳!"), "کتابهای 123!");
    }

    #[test]
    fn test_punctuation_attaches_to_previous_token() {
        let cleaner = PersianTextCleaner::default();
        assert_eq!(cleaner.clean("كِتاب خوبی بود ."), "کتاب خوبی بود.");
        assert_eq!(cleaner.clean("سلام ،دنیا؟خوبی"), "سلام، دنیا؟ خوبی");
    }

    #[test]
    fn test_letter_unification() {
        let cleaner = PersianTextCleaner::default();
        assert_eq!(cleaner.clean("يىئكؤإأٱةۀ"), "یییکواااهه");
    }

    #[test]
    fn test_zero_width_is_kept_by_default() {
        let text = "می\u{200C}روم";
        assert_eq!(PersianTextCleaner::default().clean(text), text);

        let stripping = PersianTextCleaner::new(CleaningConfig {
            strip_zero_width_spaces: true,
            ..CleaningConfig::default()
        });
        assert_eq!(stripping.clean(text), "میروم");
    }

    #[test]
    fn test_disabled_steps_leave_text_alone() {
        let cleaner = PersianTextCleaner::new(CleaningConfig {
            remove_diacritics: false,
            normalize_whitespace: false,
            convert_arabic_chars: false,
            standardize_digits: false,
            remove_tatweel: false,
            standardize_punctuation_spacing: false,
            strip_zero_width_spaces: false,
        });
        let text = "  كِتاب\u{0640}  ١٢ !";
        assert_eq!(cleaner.clean(text), text);
    }

    #[test]
    fn test_whitespace_collapse() {
        let cleaner = PersianTextCleaner::default();
        assert_eq!(cleaner.clean("\tیک   دو\n\nسه  "), "یک دو سه");
        assert_eq!(cleaner.clean("   "), "");
    }

    #[test]
    fn test_ascii_digit_ranges() {
        assert_eq!(ascii_digit('٠'), '0');
        assert_eq!(ascii_digit('٩'), '9');
        assert_eq!(ascii_digit('۰'), '0');
        assert_eq!(ascii_digit('۹'), '9');
        assert_eq!(ascii_digit('7'), '7');
    }
}
