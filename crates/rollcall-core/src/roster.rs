//! Operator roster invariants: unique ids, unique bounded LED indices, known stations.

use crate::types::Operator;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RosterError {
    #[error("duplicate operator id {0}")]
    DuplicateId(String),
    #[error("LED index {index} assigned to both {first} and {second}")]
    DuplicateLed {
        index: u32,
        first: String,
        second: String,
    },
    #[error("LED index {index} of operator {operator} exceeds maximum {max}")]
    LedOutOfRange { operator: String, index: u32, max: u32 },
    #[error("operator {operator} assigned to unknown station {station:?}")]
    UnknownStation { operator: String, station: String },
}

impl RosterError {
    /// Operator whose LED index should not be trusted, if the violation is LED-related.
    pub fn led_offender(&self) -> Option<&str> {
        match self {
            RosterError::DuplicateLed { second, .. } => Some(second),
            RosterError::LedOutOfRange { operator, .. } => Some(operator),
            _ => None,
        }
    }
}

/// Limits a roster must respect.
#[derive(Debug, Clone)]
pub struct RosterRules {
    /// Highest valid LED index (inclusive); indices live in `[0, max_led_index]`.
    pub max_led_index: u32,
    /// Allowed station names. Empty means any station is accepted.
    pub stations: Vec<String>,
}

/// Check the whole roster, returning every violation found (in roster order).
pub fn validate_roster(operators: &[Operator], rules: &RosterRules) -> Vec<RosterError> {
    let mut errors = Vec::new();
    let mut seen_ids: HashSet<&str> = HashSet::new();
    let mut led_owner: HashMap<u32, &str> = HashMap::new();

    for op in operators {
        if !seen_ids.insert(op.id.as_str()) {
            errors.push(RosterError::DuplicateId(op.id.clone()));
        }

        if !rules.stations.is_empty() && !rules.stations.iter().any(|s| s == &op.station) {
            errors.push(RosterError::UnknownStation {
                operator: op.id.clone(),
                station: op.station.clone(),
            });
        }

        let Some(index) = op.led_index else {
            continue;
        };
        if index > rules.max_led_index {
            errors.push(RosterError::LedOutOfRange {
                operator: op.id.clone(),
                index,
                max: rules.max_led_index,
            });
            continue;
        }
        if let Some(first) = led_owner.get(&index) {
            errors.push(RosterError::DuplicateLed {
                index,
                first: (*first).to_string(),
                second: op.id.clone(),
            });
        } else {
            led_owner.insert(index, op.id.as_str());
        }
    }

    errors
}

/// Smallest LED index not in use, or `None` when every index is taken.
pub fn next_free_led(operators: &[Operator], rules: &RosterRules) -> Option<u32> {
    (0..=rules.max_led_index)
        .find(|idx| !operators.iter().any(|op| op.led_index == Some(*idx)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: &str, station: &str, led: Option<u32>) -> Operator {
        Operator {
            id: id.into(),
            name: id.into(),
            employee_id: format!("E{id}"),
            station: station.into(),
            photo: String::new(),
            led_index: led,
        }
    }

    fn rules() -> RosterRules {
        RosterRules {
            max_led_index: 3,
            stations: vec!["press".into(), "weld".into()],
        }
    }

    #[test]
    fn test_valid_roster() {
        let ops = vec![
            op("1", "press", Some(0)),
            op("2", "weld", Some(3)),
            op("3", "weld", None),
        ];
        assert!(validate_roster(&ops, &rules()).is_empty());
    }

    #[test]
    fn test_duplicate_led_reports_second_owner() {
        let ops = vec![op("1", "press", Some(1)), op("2", "weld", Some(1))];
        let errors = validate_roster(&ops, &rules());
        assert_eq!(
            errors,
            vec![RosterError::DuplicateLed {
                index: 1,
                first: "1".into(),
                second: "2".into()
            }]
        );
        assert_eq!(errors[0].led_offender(), Some("2"));
    }

    #[test]
    fn test_led_out_of_range() {
        let ops = vec![op("1", "press", Some(4))];
        let errors = validate_roster(&ops, &rules());
        assert!(matches!(errors[0], RosterError::LedOutOfRange { index: 4, max: 3, .. }));
    }

    #[test]
    fn test_unknown_station_and_duplicate_id() {
        let ops = vec![op("1", "paint", None), op("1", "press", None)];
        let errors = validate_roster(&ops, &rules());
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], RosterError::UnknownStation { .. }));
        assert_eq!(errors[1], RosterError::DuplicateId("1".into()));
    }

    #[test]
    fn test_empty_station_list_accepts_anything() {
        let rules = RosterRules {
            max_led_index: 3,
            stations: vec![],
        };
        assert!(validate_roster(&[op("1", "anything", None)], &rules).is_empty());
    }

    #[test]
    fn test_next_free_led_and_release_on_delete() {
        let mut ops = vec![
            op("1", "press", Some(0)),
            op("2", "press", Some(1)),
            op("3", "press", Some(2)),
        ];
        assert_eq!(next_free_led(&ops, &rules()), Some(3));
        ops.push(op("4", "press", Some(3)));
        assert_eq!(next_free_led(&ops, &rules()), None);

        // Deleting operator 2 frees index 1.
        ops.retain(|o| o.id != "2");
        assert_eq!(next_free_led(&ops, &rules()), Some(1));
    }
}
