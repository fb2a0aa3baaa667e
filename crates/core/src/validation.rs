//! Bridges `validator` derive output into [`CoreError::InvalidFields`].

use validator::{Validate, ValidationErrors};

use crate::error::{CoreError, FieldIssue};

/// Flatten `validator` errors into one [`FieldIssue`] per failed rule,
/// ordered by field name.
pub fn field_issues(errors: &ValidationErrors) -> Vec<FieldIssue> {
    let mut issues: Vec<FieldIssue> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            let field = field.to_string();
            errs.iter().map(move |e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("failed '{}' check", e.code));
                FieldIssue::new(field.clone(), message)
            })
        })
        .collect();
    issues.sort_by(|a, b| a.field.cmp(&b.field));
    issues
}

/// Run derive-based validation and collect the failures.
pub fn collect_issues<T: Validate>(value: &T) -> Vec<FieldIssue> {
    match value.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => field_issues(&errors),
    }
}

/// Turn a list of issues into a result.
pub fn into_result(issues: Vec<FieldIssue>) -> Result<(), CoreError> {
    if issues.is_empty() {
        Ok(())
    } else {
        Err(CoreError::InvalidFields(issues))
    }
}
