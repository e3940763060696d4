//! Garde helpers shared by configuration types.

use crate::domain::DomainError;
use garde::{Report, Validate};

/// Run garde's rules, folding every violation into one `InvalidConfiguration`
pub fn validate_struct<T>(value: &T) -> Result<(), DomainError>
where
    T: Validate,
    T::Context: Default,
{
    value.validate().map_err(|report| {
        DomainError::InvalidConfiguration(describe_violations(&report).join("; "))
    })
}

/// One `field: problem` line per violation, in field order
pub fn describe_violations(report: &Report) -> Vec<String> {
    let mut lines: Vec<String> = report
        .iter()
        .map(|(path, error)| match path.to_string() {
            field if field.is_empty() => error.message().to_string(),
            field => format!("{field}: {}", error.message()),
        })
        .collect();
    lines.sort();
    lines
}
