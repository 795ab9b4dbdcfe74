//! Candidate entry sanitation and validation

use rand::Rng;

use crate::config::GameConfig;
use crate::types::{round2, CandidateEntry, RoundEntry};

/// Placeholder for letters that are not revealed yet
pub const MASK_CHAR: char = '_';

/// Formatting tags some providers leave in answers
const MARKUP_TAGS: &[&str] = &["<b>", "</b>", "<i>", "</i>", "<u>", "</u>", "<em>", "</em>"];

/// Why a candidate was turned down
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("entry has no id")]
    MissingId,
    #[error("entry has no clue")]
    MissingClue,
    #[error("entry has no answer")]
    MissingAnswer,
    #[error("answer contains the mask character")]
    ContainsMaskChar,
    #[error("entry contains denylisted word '{0}'")]
    InvalidWord(String),
}

impl CandidateEntry {
    /// Clean up provider formatting in place
    pub fn sanitize(&mut self) {
        self.clue = self.clue.replace('\\', "").trim().to_string();

        let answer = self.answer.trim().replace(['\\', '(', ')'], "");
        let answer = strip_markup(&answer);
        let answer = trim_surrounding(&answer, '"');
        let answer = trim_surrounding(answer, '\'');
        self.answer = answer.trim().to_string();

        self.category = self
            .category
            .take()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
    }

    /// Check the sanitized candidate against the acceptance rules
    pub fn validate(&self, invalid_words: &[String]) -> Result<(), Rejection> {
        if self.id.is_none() {
            return Err(Rejection::MissingId);
        }
        if self.clue.trim().is_empty() {
            return Err(Rejection::MissingClue);
        }
        if self.answer.trim().is_empty() {
            return Err(Rejection::MissingAnswer);
        }
        if self.answer.contains(MASK_CHAR) {
            return Err(Rejection::ContainsMaskChar);
        }

        let answer = self.answer.to_lowercase();
        let clue = self.clue.to_lowercase();
        let category = self.category.as_deref().unwrap_or_default().to_lowercase();
        if let Some(word) = invalid_words
            .iter()
            .find(|w| answer.contains(w.as_str()) || clue.contains(w.as_str()) || category.contains(w.as_str()))
        {
            return Err(Rejection::InvalidWord(word.clone()));
        }

        Ok(())
    }

    /// Sanitize, validate and turn the candidate into the round's entry
    pub fn into_round_entry<R: Rng + ?Sized>(
        mut self,
        config: &GameConfig,
        rng: &mut R,
    ) -> Result<RoundEntry, Rejection> {
        self.sanitize();
        self.validate(&config.invalid_words)?;
        let id = self.id.ok_or(Rejection::MissingId)?;
        Ok(RoundEntry {
            id,
            value: round2(scale_value(self.value, rng)),
            category: self.category,
            clue: self.clue,
            answer: self.answer,
        })
    }
}

/// Bring a provider value onto the 10-100 prize scale.
///
/// Missing (or zero) values get a random multiple of 10 in that range,
/// anything else is divided by 10.
pub fn scale_value<R: Rng + ?Sized>(raw: Option<f64>, rng: &mut R) -> f64 {
    match raw {
        Some(value) if value.is_finite() && value > 0.0 => value / 10.0,
        _ => (rng.random_range(1..=10u32) * 10) as f64,
    }
}

/// Remove formatting tags, ignoring ASCII case
fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    'outer: while let Some(c) = rest.chars().next() {
        if c == '<' {
            for tag in MARKUP_TAGS {
                if rest
                    .get(..tag.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(tag))
                {
                    rest = &rest[tag.len()..];
                    continue 'outer;
                }
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Drop one pair of `quote` wrapping the whole string
fn trim_surrounding(input: &str, quote: char) -> &str {
    if input.chars().count() >= 2 && input.starts_with(quote) && input.ends_with(quote) {
        &input[quote.len_utf8()..input.len() - quote.len_utf8()]
    } else {
        input
    }
}
