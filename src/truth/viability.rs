//! Link viability: demographic sanity checks on a proposed link.
//!
//! A non-viable pair is never predicted positive, whatever its distance. Every
//! check resolves to *viable* when a year field cannot be parsed, so bad data
//! can only widen the candidate set, never silently drop a true link. Years
//! whose difference overflows `i32` are non-viable.

use serde::{Deserialize, Serialize};

use crate::record::{Record, RecordPair};

/// Demographic limits used by the viability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViabilityConfig {
    /// Largest birth-year gap between siblings; `None` disables the check.
    #[serde(default = "default_max_sibling_age_difference")]
    pub max_sibling_age_difference: Option<i32>,
    #[serde(default = "default_min_parent_age_at_birth")]
    pub min_parent_age_at_birth: i32,
    #[serde(default = "default_max_parent_age_at_birth")]
    pub max_parent_age_at_birth: i32,
    #[serde(default = "default_max_age_at_death")]
    pub max_age_at_death: i32,
}

fn default_max_sibling_age_difference() -> Option<i32> {
    Some(40)
}
fn default_min_parent_age_at_birth() -> i32 {
    14
}
fn default_max_parent_age_at_birth() -> i32 {
    50
}
fn default_max_age_at_death() -> i32 {
    120
}

impl Default for ViabilityConfig {
    fn default() -> Self {
        Self {
            max_sibling_age_difference: default_max_sibling_age_difference(),
            min_parent_age_at_birth: default_min_parent_age_at_birth(),
            max_parent_age_at_birth: default_max_parent_age_at_birth(),
            max_age_at_death: default_max_age_at_death(),
        }
    }
}

/// A viability check. The first field of each variant is read from the pair's
/// first record, the second field from the second record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ViabilityRule {
    /// Every pair is viable.
    #[default]
    Always,
    /// Birth years of two siblings are close enough.
    SiblingBirthYears { year1: usize, year2: usize },
    /// The child was born while the parent was of plausible parenting age.
    ParentChildBirthYears { parent_year: usize, child_year: usize },
    /// Death happened no earlier than marriage.
    DeathAfterMarriage { death_year: usize, marriage_year: usize },
    /// Age at an event (death, marriage) lies in `[0, max_age_at_death]`.
    AgeAtEvent { birth_year: usize, event_year: usize },
}

impl ViabilityRule {
    pub fn is_viable(&self, pair: &RecordPair<'_>, config: &ViabilityConfig) -> bool {
        let years = |f1: usize, f2: usize| {
            Some((year(pair.record1, f1)?, year(pair.record2, f2)?))
        };
        match *self {
            Self::Always => true,
            Self::SiblingBirthYears { year1, year2 } => {
                match (config.max_sibling_age_difference, years(year1, year2)) {
                    (Some(max), Some((y1, y2))) => gap(y1, y2).and_then(i32::checked_abs).is_some_and(|g| g <= max),
                    _ => true,
                }
            }
            Self::ParentChildBirthYears {
                parent_year,
                child_year,
            } => match years(parent_year, child_year) {
                Some((parent, child)) => gap(child, parent).is_some_and(|age| {
                    (config.min_parent_age_at_birth..=config.max_parent_age_at_birth).contains(&age)
                }),
                None => true,
            },
            Self::DeathAfterMarriage {
                death_year,
                marriage_year,
            } => match years(death_year, marriage_year) {
                Some((death, marriage)) => death >= marriage,
                None => true,
            },
            Self::AgeAtEvent {
                birth_year,
                event_year,
            } => match years(birth_year, event_year) {
                Some((birth, event)) => gap(event, birth)
                    .is_some_and(|age| (0..=config.max_age_at_death).contains(&age)),
                None => true,
            },
        }
    }
}

fn year(record: &Record, field: usize) -> Option<i32> {
    record.get(field)?.trim().parse().ok()
}

/// `later - earlier`; `None` (non-viable) when the years are too far apart for `i32`.
fn gap(later: i32, earlier: i32) -> Option<i32> {
    later.checked_sub(earlier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Schema;
    use std::sync::Arc;

    fn rec(year: &str) -> Record {
        let schema = Arc::new(Schema::new("r", vec!["id".into(), "year".into()], "id").unwrap());
        Record::from_pairs(schema, &[("id", "x"), ("year", year)]).unwrap()
    }

    fn check(rule: ViabilityRule, y1: &str, y2: &str) -> bool {
        let (a, b) = (rec(y1), rec(y2));
        rule.is_viable(&RecordPair::new(&a, &b), &ViabilityConfig::default())
    }

    #[test]
    fn sibling_age_gap() {
        let rule = ViabilityRule::SiblingBirthYears { year1: 1, year2: 1 };
        assert!(check(rule, "1880", "1920"));
        assert!(!check(rule, "1880", "1921"));
        assert!(!check(rule, "1921", "1880"));
    }

    #[test]
    fn sibling_check_can_be_disabled() {
        let rule = ViabilityRule::SiblingBirthYears { year1: 1, year2: 1 };
        let config = ViabilityConfig {
            max_sibling_age_difference: None,
            ..Default::default()
        };
        let (a, b) = (rec("1800"), rec("1900"));
        assert!(rule.is_viable(&RecordPair::new(&a, &b), &config));
    }

    #[test]
    fn parent_child_window() {
        let rule = ViabilityRule::ParentChildBirthYears {
            parent_year: 1,
            child_year: 1,
        };
        assert!(check(rule, "1850", "1864"));
        assert!(check(rule, "1850", "1900"));
        assert!(!check(rule, "1850", "1863"));
        assert!(!check(rule, "1850", "1901"));
    }

    #[test]
    fn death_after_marriage() {
        let rule = ViabilityRule::DeathAfterMarriage {
            death_year: 1,
            marriage_year: 1,
        };
        assert!(check(rule, "1900", "1900"));
        assert!(!check(rule, "1899", "1900"));
    }

    #[test]
    fn age_at_event() {
        let rule = ViabilityRule::AgeAtEvent {
            birth_year: 1,
            event_year: 1,
        };
        assert!(check(rule, "1800", "1920"));
        assert!(!check(rule, "1800", "1921"));
        assert!(!check(rule, "1900", "1899"));
    }

    #[test]
    fn extreme_years_are_not_viable() {
        let (max, min) = (i32::MAX.to_string(), i32::MIN.to_string());
        let sibling = ViabilityRule::SiblingBirthYears { year1: 1, year2: 1 };
        assert!(!check(sibling, &max, &min));
        assert!(!check(sibling, &min, &max));
        assert!(!check(sibling, &min, "0"));
        let parent = ViabilityRule::ParentChildBirthYears {
            parent_year: 1,
            child_year: 1,
        };
        assert!(!check(parent, &min, &max));
        let age = ViabilityRule::AgeAtEvent {
            birth_year: 1,
            event_year: 1,
        };
        assert!(!check(age, &min, &max));
        assert!(!check(age, &max, &min));
    }

    #[test]
    fn malformed_year_is_viable() {
        let rule = ViabilityRule::DeathAfterMarriage {
            death_year: 1,
            marriage_year: 1,
        };
        assert!(check(rule, "18??", "1900"));
        assert!(check(rule, "", "1900"));
        let out_of_range = ViabilityRule::DeathAfterMarriage {
            death_year: 5,
            marriage_year: 1,
        };
        assert!(check(out_of_range, "1800", "1900"));
    }
}
