//! Garde validation helpers shared by request types.

use crate::domain::DomainError;
use garde::{Report, Validate};

/// Run garde validation and fold the report into a `DomainError`
pub fn validate_struct<T>(value: &T) -> Result<(), DomainError>
where
    T: Validate,
    T::Context: Default,
{
    value
        .validate()
        .map_err(|report| DomainError::ValidationError(format_validation_errors(&report)))
}

fn format_validation_errors(report: &Report) -> String {
    report
        .iter()
        .map(|(path, error)| {
            let path = path.to_string();
            if path.is_empty() {
                error.message().to_string()
            } else {
                format!("{}: {}", path, error.message())
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Validate)]
    struct Station {
        #[garde(length(min = 1))]
        code: String,
        #[garde(range(min = 1))]
        platforms: u8,
    }

    #[test]
    fn test_valid_struct_passes() {
        let station = Station {
            code: "ctr".to_string(),
            platforms: 4,
        };
        assert!(validate_struct(&station).is_ok());
    }

    #[test]
    fn test_all_failures_are_reported() {
        let station = Station {
            code: String::new(),
            platforms: 0,
        };
        match validate_struct(&station) {
            Err(DomainError::ValidationError(msg)) => {
                assert!(msg.contains("code"));
                assert!(msg.contains("platforms"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
