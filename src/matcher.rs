//! Requirement matching.
//!
//! Decides whether a required element is present in a response. Strategies
//! are tried in order and the first hit wins:
//!
//! 1. case-insensitive substring
//! 2. substring after removing whitespace from the requirement
//! 3. domain synonym table
//! 4. functional-pattern fallback (domain independent)
//!
//! Prohibited elements never go through this matcher; they are checked with a
//! literal substring test only.

use crate::domain::Domain;
use regex::Regex;
use thiserror::Error;

/// Errors raised while building matchers and scorers
#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("Invalid pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Compile a static pattern, naming it in the error
///
/// # Errors
///
/// Returns `ScoringError::InvalidPattern` if the regex does not compile.
pub fn compile(pattern: &str) -> Result<Regex, ScoringError> {
    Regex::new(pattern).map_err(|source| ScoringError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Requirement keywords (`|` separated) and the functional pattern that satisfies them
const FUNCTIONAL_PATTERNS: &[(&str, &str)] = &[
    (
        "time|hour|slot",
        r"(?i)\b\d{1,2}(:\d{2})?\s?(am|pm)\b|\b\d{1,2}:\d{2}\b|\b(noon|midnight|morning|afternoon|evening|tonight)\b",
    ),
    (
        "date|day|weekday",
        r"(?i)\b(mon|tue|wed|thu|fri|sat|sun)[a-z]*\b|\b(today|tomorrow)\b|\b\d{1,2}[/-]\d{1,2}\b",
    ),
    (
        "direction|heading|bearing",
        r"(?i)\b(north|south|east|west|left|right|up|down|forward|ahead|back)\b",
    ),
    (
        "distance|range",
        r"(?i)\b\d+(\.\d+)?\s?(m|meters|metres|km|steps|ft|feet|blocks)\b",
    ),
    (
        "step|steps|sequence|procedure",
        r"(?im)\b(step\s*\d+|first|then|next|finally)\b|^\s*\d+[.)]",
    ),
    (
        "confirm|confirmation",
        r"(?i)\b(confirm\w*|booked|scheduled|reserved)\b",
    ),
    (
        "id|reference|ref",
        r"(?i)#\w*\d\w*|\b(ref|id|booking)\s*[:#]?\s*\w*\d\w*\b",
    ),
];

/// Matches required elements against responses
#[derive(Debug)]
pub struct RequirementMatcher {
    functional: Vec<(Vec<&'static str>, Regex)>,
}

impl RequirementMatcher {
    /// Build the matcher, compiling the functional patterns once
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new() -> Result<Self, ScoringError> {
        let functional = FUNCTIONAL_PATTERNS
            .iter()
            .map(|(keywords, pattern)| {
                compile(pattern).map(|re| (keywords.split('|').collect(), re))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { functional })
    }

    /// Whether `requirement` is satisfied by `output` in `domain`
    #[must_use]
    pub fn matches(&self, output: &str, requirement: &str, domain: Domain) -> bool {
        let requirement = requirement.trim().to_lowercase();
        if requirement.is_empty() {
            return true;
        }
        let output = output.to_lowercase();

        literal_match(&output, &requirement)
            || compact_match(&output, &requirement)
            || synonym_match(&output, &requirement, domain)
            || self.functional_match(&output, &requirement)
    }

    /// Which strategy satisfied the requirement, if any
    #[must_use]
    pub fn strategy(&self, output: &str, requirement: &str, domain: Domain) -> Option<MatchStrategy> {
        let requirement = requirement.trim().to_lowercase();
        let output = output.to_lowercase();
        if requirement.is_empty() || literal_match(&output, &requirement) {
            Some(MatchStrategy::Literal)
        } else if compact_match(&output, &requirement) {
            Some(MatchStrategy::Compact)
        } else if synonym_match(&output, &requirement, domain) {
            Some(MatchStrategy::Synonym)
        } else if self.functional_match(&output, &requirement) {
            Some(MatchStrategy::Functional)
        } else {
            None
        }
    }

    fn functional_match(&self, output: &str, requirement: &str) -> bool {
        let words: Vec<&str> = requirement
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        self.functional
            .iter()
            .filter(|(keywords, _)| words.iter().any(|w| keywords.iter().any(|k| k == w)))
            .any(|(_, re)| re.is_match(output))
    }
}

/// Strategy that produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Literal,
    Compact,
    Synonym,
    Functional,
}

fn literal_match(output: &str, requirement: &str) -> bool {
    output.contains(requirement)
}

fn compact_match(output: &str, requirement: &str) -> bool {
    let compact: String = requirement.chars().filter(|c| !c.is_whitespace()).collect();
    !compact.is_empty() && output.contains(&compact)
}

fn synonym_match(output: &str, requirement: &str, domain: Domain) -> bool {
    domain
        .profile()
        .synonyms
        .iter()
        .find(|(canonical, synonyms)| {
            *canonical == requirement || synonyms.split('|').any(|s| s == requirement)
        })
        .is_some_and(|(canonical, synonyms)| {
            std::iter::once(*canonical)
                .chain(synonyms.split('|'))
                .any(|term| contains_term(output, term))
        })
}

/// Whole-word containment for single words, substring for phrases
pub(crate) fn contains_term(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    if term.chars().all(char::is_alphanumeric) {
        haystack
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == term)
    } else {
        haystack.contains(term)
    }
}
