use serde::Serialize;
use std::fmt;

/// One failed field-level check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// Field-level violations collected across a whole entity.
///
/// Build it up with `add`, then call `into_result`, which only errs when at
/// least one violation was recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    violations: Vec<FieldViolation>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Records a violation when `ok` is false.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add(field, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for v in &self.violations {
            if !fields.contains(&v.field.as_str()) {
                fields.push(&v.field);
            }
        }
        fields
    }

    pub fn messages_for(&self, field: &str) -> Vec<&str> {
        self.violations
            .iter()
            .filter(|v| v.field == field)
            .map(|v| v.message.as_str())
            .collect()
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed:")?;
        for v in &self.violations {
            write!(f, " {}: {};", v.field, v.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DbError;

    #[test]
    fn test_empty_collection_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_collects_per_field_messages() {
        let mut errors = ValidationErrors::new();
        errors.check(false, "email", "must contain @");
        errors.check(true, "name", "required");
        errors.add("email", "too long");

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.messages_for("email"), vec!["must contain @", "too long"]);
        assert!(errors.messages_for("name").is_empty());

        let err: DbError = errors.into_result().unwrap_err().into();
        assert!(err.to_string().contains("email: too long"));
    }
}
