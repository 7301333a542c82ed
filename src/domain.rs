//! Task domains and domain-aware threshold adjustment.
//!
//! Every per-domain constant lives in [`DomainProfile`]. Adding a domain means
//! adding a profile here; the scorer and matcher only ever ask for a profile.

use crate::walkthrough::TrialSpecification;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised when parsing a domain identifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid domain identifier (expected D<number>): {0}")]
    InvalidIdentifier(String),
}

/// Task domain, identified by `D<n>` in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Domain {
    /// D1
    AppointmentBooking,
    /// D2
    SpatialNavigation,
    /// D3
    FailureDiagnostics,
    /// Any other `D<n>`; scored with the default tables
    Unlisted(u32),
}

impl Domain {
    /// Domains with dedicated tables
    pub const LISTED: [Self; 3] = [
        Self::AppointmentBooking,
        Self::SpatialNavigation,
        Self::FailureDiagnostics,
    ];

    /// Numeric part of the `D<n>` identifier
    #[must_use]
    pub const fn number(self) -> u32 {
        match self {
            Self::AppointmentBooking => 1,
            Self::SpatialNavigation => 2,
            Self::FailureDiagnostics => 3,
            Self::Unlisted(n) => n,
        }
    }

    /// Build a domain from its number
    #[must_use]
    pub const fn from_number(n: u32) -> Self {
        match n {
            1 => Self::AppointmentBooking,
            2 => Self::SpatialNavigation,
            3 => Self::FailureDiagnostics,
            other => Self::Unlisted(other),
        }
    }

    /// Human-readable domain name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AppointmentBooking => "Appointment Booking",
            Self::SpatialNavigation => "Spatial Navigation",
            Self::FailureDiagnostics => "Failure Diagnostics",
            Self::Unlisted(_) => "Unlisted Domain",
        }
    }

    /// Derive the domain from a trial id such as `D2-T3`.
    ///
    /// Ids without a parseable `D<n>` prefix fall back to D1.
    #[must_use]
    pub fn from_trial_id(id: &str) -> Self {
        parse_prefix(id).unwrap_or(Self::AppointmentBooking)
    }

    /// Static tables for this domain
    #[must_use]
    pub const fn profile(self) -> &'static DomainProfile {
        match self {
            Self::AppointmentBooking => &APPOINTMENT_BOOKING,
            Self::SpatialNavigation => &SPATIAL_NAVIGATION,
            Self::FailureDiagnostics => &FAILURE_DIAGNOSTICS,
            Self::Unlisted(_) => &DEFAULT_PROFILE,
        }
    }
}

fn parse_prefix(id: &str) -> Option<Domain> {
    let rest = id.trim().strip_prefix(|c: char| c == 'D' || c == 'd')?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u32>().ok().map(Domain::from_number)
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.number())
    }
}

impl FromStr for Domain {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let rest = trimmed
            .strip_prefix(|c: char| c == 'D' || c == 'd')
            .ok_or_else(|| DomainError::InvalidIdentifier(s.to_string()))?;
        rest.parse::<u32>()
            .map(Self::from_number)
            .map_err(|_| DomainError::InvalidIdentifier(s.to_string()))
    }
}

impl TryFrom<String> for Domain {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Domain> for String {
    fn from(domain: Domain) -> Self {
        domain.to_string()
    }
}

/// One performance tier band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierBand {
    /// Minimum functional score
    pub min_score: f64,
    /// Minimum required-element coverage
    pub min_required_ratio: f64,
}

/// Excellent/good/acceptable bands; anything below acceptable is poor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierBands {
    pub excellent: TierBand,
    pub good: TierBand,
    pub acceptable: TierBand,
}

/// Base latency and accuracy bar for a domain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaseThresholds {
    pub max_latency_ms: u64,
    pub min_accuracy: f64,
}

/// Canonical term with its accepted synonyms, separated by `|`
pub type SynonymEntry = (&'static str, &'static str);

/// Static per-domain configuration
#[derive(Debug)]
pub struct DomainProfile {
    /// Token budget multiplier (> 1.0 for naturally verbose domains)
    pub complexity_multiplier: f64,
    pub base: BaseThresholds,
    pub tiers: TierBands,
    pub synonyms: &'static [SynonymEntry],
    /// On-topic vocabulary regexes, 2-4 per domain
    pub lexical_patterns: &'static [&'static str],
    /// Domain-characteristic slot regexes used by the structural check
    pub slot_patterns: &'static [&'static str],
}

const APPOINTMENT_BOOKING: DomainProfile = DomainProfile {
    complexity_multiplier: 1.0,
    base: BaseThresholds {
        max_latency_ms: 500,
        min_accuracy: 0.80,
    },
    tiers: TierBands {
        excellent: TierBand {
            min_score: 0.85,
            min_required_ratio: 0.8,
        },
        good: TierBand {
            min_score: 0.70,
            min_required_ratio: 0.6,
        },
        acceptable: TierBand {
            min_score: 0.50,
            min_required_ratio: 0.4,
        },
    },
    synonyms: &[
        ("confirmed", "booked|scheduled|reserved|all set"),
        ("appointment", "booking|slot|visit"),
        ("cancelled", "canceled|cancel|removed"),
        ("monday", "mon"),
        ("tuesday", "tue|tues"),
        ("wednesday", "wed"),
        ("thursday", "thu|thurs"),
        ("friday", "fri"),
        ("3pm", "3 pm|15:00|3:00pm|3:00 pm"),
        ("doctor", "dr|physician"),
    ],
    lexical_patterns: &[
        r"(?i)\b(appointment|booking|booked|schedul\w*|reserv\w*)\b",
        r"(?i)\b(mon|tue|wed|thu|fri|sat|sun)\w*\b",
        r"(?i)\b\d{1,2}(:\d{2})?\s?(am|pm)\b",
        r"(?i)\b(cardiology|dermatology|neurology|dentist|doctor|clinic|dr)\b",
    ],
    slot_patterns: &[
        r"(?i)\b\d{1,2}(:\d{2})?\s?(am|pm)\b|\b\d{1,2}:\d{2}\b",
        r"(?i)\b(mon|tue|wed|thu|fri|sat|sun)\w*\b|\b(today|tomorrow)\b",
    ],
};

const SPATIAL_NAVIGATION: DomainProfile = DomainProfile {
    complexity_multiplier: 1.1,
    base: BaseThresholds {
        max_latency_ms: 600,
        min_accuracy: 0.75,
    },
    tiers: TierBands {
        excellent: TierBand {
            min_score: 0.80,
            min_required_ratio: 0.75,
        },
        good: TierBand {
            min_score: 0.65,
            min_required_ratio: 0.5,
        },
        acceptable: TierBand {
            min_score: 0.45,
            min_required_ratio: 0.35,
        },
    },
    synonyms: &[
        ("north", "up|forward|ahead"),
        ("south", "down|back|backward"),
        ("east", "right"),
        ("west", "left"),
        ("meters", "m|metres|meter"),
        ("obstacle", "blocked|barrier|wall"),
        ("turn", "rotate|face"),
    ],
    lexical_patterns: &[
        r"(?i)\b(north|south|east|west|left|right|forward|ahead)\b",
        r"(?i)\b\d+(\.\d+)?\s?(m|meters|metres|km|steps|ft|feet|blocks)\b",
        r"(?i)\b(turn|move|go|head|proceed|continue)\b",
        r"(?i)\b(obstacle|path|route|waypoint|grid|cell)\b",
    ],
    slot_patterns: &[
        r"(?i)\b(north|south|east|west|left|right|up|down|forward)\b",
        r"(?i)\b\d+(\.\d+)?\s?(m|meters|metres|km|steps|ft|feet|blocks)\b",
    ],
};

const FAILURE_DIAGNOSTICS: DomainProfile = DomainProfile {
    complexity_multiplier: 1.3,
    base: BaseThresholds {
        max_latency_ms: 800,
        min_accuracy: 0.70,
    },
    tiers: TierBands {
        excellent: TierBand {
            min_score: 0.75,
            min_required_ratio: 0.75,
        },
        good: TierBand {
            min_score: 0.60,
            min_required_ratio: 0.5,
        },
        acceptable: TierBand {
            min_score: 0.40,
            min_required_ratio: 0.33,
        },
    },
    synonyms: &[
        ("restart", "reboot|power cycle|reset"),
        ("error", "fault|failure|exception"),
        ("check", "inspect|verify|test"),
        ("replace", "swap|substitute"),
        ("sensor", "probe|detector"),
        ("cable", "wire|connector|lead"),
    ],
    lexical_patterns: &[
        r"(?i)\b(error|fault|failure|malfunction|code)\b",
        r"(?i)\b(sensor|cable|power|module|component|fan|disk|battery)\b",
        r"(?i)\b(restart|reboot|replace|reset|inspect|update)\b",
    ],
    slot_patterns: &[
        r"(?i)\b(error|fault|failure|sensor|cable|power|module|component)\b",
        r"(?im)\b(step\s*\d+|first|then|next|finally)\b|^\s*\d+[.)]",
    ],
};

const DEFAULT_PROFILE: DomainProfile = DomainProfile {
    complexity_multiplier: 1.0,
    base: BaseThresholds {
        max_latency_ms: 700,
        min_accuracy: 0.75,
    },
    tiers: TierBands {
        excellent: TierBand {
            min_score: 0.85,
            min_required_ratio: 0.8,
        },
        good: TierBand {
            min_score: 0.70,
            min_required_ratio: 0.6,
        },
        acceptable: TierBand {
            min_score: 0.50,
            min_required_ratio: 0.4,
        },
    },
    synonyms: &[],
    lexical_patterns: &[
        r"(?i)\b(done|complete\w*|ready|result|status)\b",
        r"\b\d+\b",
    ],
    slot_patterns: &[r"\b\d+\b|:"],
};

/// Thresholds after domain adjustment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjustedCriteria {
    pub domain: Domain,
    pub min_accuracy: f64,
    pub max_tokens: usize,
    pub max_latency_ms: u64,
}

/// Scale a trial's token budget by its domain and look up the domain bar
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn adjust(trial: &TrialSpecification) -> AdjustedCriteria {
    let domain = trial.resolved_domain();
    let profile = domain.profile();
    let scaled = (trial.success_criteria.max_tokens as f64 * profile.complexity_multiplier).round();

    AdjustedCriteria {
        domain,
        min_accuracy: profile.base.min_accuracy,
        max_tokens: scaled.max(0.0) as usize,
        max_latency_ms: profile.base.max_latency_ms,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::walkthrough::SuccessCriteria;

    fn trial(id: &str, max_tokens: usize) -> TrialSpecification {
        TrialSpecification::new(
            id,
            "input",
            SuccessCriteria {
                required_elements: Vec::new(),
                prohibited_elements: Vec::new(),
                expected_completion: true,
                max_tokens,
                max_latency_ms: 100,
                min_accuracy: None,
            },
        )
    }

    #[test]
    fn test_domain_from_trial_id() {
        assert_eq!(Domain::from_trial_id("D1-T1"), Domain::AppointmentBooking);
        assert_eq!(Domain::from_trial_id("D2_nav"), Domain::SpatialNavigation);
        assert_eq!(Domain::from_trial_id("d3-diag-2"), Domain::FailureDiagnostics);
        assert_eq!(Domain::from_trial_id("D12-x"), Domain::Unlisted(12));
    }

    #[test]
    fn test_domain_from_trial_id_falls_back_to_first_domain() {
        assert_eq!(Domain::from_trial_id(""), Domain::AppointmentBooking);
        assert_eq!(Domain::from_trial_id("T1"), Domain::AppointmentBooking);
        assert_eq!(Domain::from_trial_id("Dx-1"), Domain::AppointmentBooking);
    }

    #[test]
    fn test_domain_parse_and_display() {
        assert_eq!("D2".parse::<Domain>().unwrap(), Domain::SpatialNavigation);
        assert_eq!(Domain::Unlisted(7).to_string(), "D7");
        assert!("navigation".parse::<Domain>().is_err());
        assert!(matches!(
            "D".parse::<Domain>(),
            Err(DomainError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_domain_serde_uses_identifier() {
        let yaml = serde_yaml::to_string(&Domain::FailureDiagnostics).unwrap();
        assert_eq!(yaml.trim(), "D3");
        let parsed: Domain = serde_yaml::from_str("D9").unwrap();
        assert_eq!(parsed, Domain::Unlisted(9));
    }

    #[test]
    fn test_adjust_scales_token_budget_by_multiplier() {
        let adjusted = adjust(&trial("D3-T1", 100));
        assert_eq!(adjusted.domain, Domain::FailureDiagnostics);
        assert_eq!(adjusted.max_tokens, 130);
        assert_eq!(adjusted.max_latency_ms, 800);
        assert!((adjusted.min_accuracy - 0.70).abs() < f64::EPSILON);
    }

    #[test]
    fn test_adjust_rounds_budget() {
        // 45 * 1.1 = 49.5
        let adjusted = adjust(&trial("D2-T1", 45));
        assert_eq!(adjusted.max_tokens, 50);
    }

    #[test]
    fn test_adjust_unknown_domain_uses_default_table() {
        let adjusted = adjust(&trial("D8-T1", 40));
        assert_eq!(adjusted.domain, Domain::Unlisted(8));
        assert_eq!(adjusted.max_tokens, 40);
        assert_eq!(adjusted.max_latency_ms, 700);
        assert!((adjusted.min_accuracy - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_verbose_domains_have_larger_multiplier() {
        for domain in Domain::LISTED {
            assert!(domain.profile().complexity_multiplier >= 1.0);
        }
        assert!(Domain::FailureDiagnostics.profile().complexity_multiplier > 1.0);
    }

    #[test]
    fn test_tier_bands_are_ordered() {
        for domain in Domain::LISTED.into_iter().chain([Domain::Unlisted(4)]) {
            let tiers = domain.profile().tiers;
            assert!(tiers.excellent.min_score > tiers.good.min_score);
            assert!(tiers.good.min_score > tiers.acceptable.min_score);
            assert!(tiers.excellent.min_required_ratio >= tiers.good.min_required_ratio);
        }
    }
}
