use std::fmt;

use crate::kyc::{KycStatus, ReviewAction};

/// A single rejected input field together with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Validation failed: {}", join_issues(.0))]
    InvalidFields(Vec<FieldIssue>),

    #[error("Duplicate application: {0}")]
    DuplicateApplication(String),

    #[error("A rejection reason is required to reject an application")]
    MissingRejectionReason,

    #[error("Cannot {action} an application that is already {status}")]
    InvalidTransition {
        status: KycStatus,
        action: ReviewAction,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl CoreError {
    /// The individual field issues, when the error carries them.
    pub fn field_issues(&self) -> &[FieldIssue] {
        match self {
            CoreError::InvalidFields(issues) => issues,
            _ => &[],
        }
    }
}
