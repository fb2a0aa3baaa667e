//! KYC (seller verification) statuses, review actions, transition rules,
//! submission validation, and the resubmission policy.
//!
//! The backend owns the status of every application. The rules here only
//! decide which review actions a client may offer for an observed status and
//! which submissions are obviously invalid before they leave the process.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{CoreError, FieldIssue};
use crate::types::{utc_timestamp, EntityId, Timestamp};
use crate::validation;

// ---------------------------------------------------------------------------
// Document constants
// ---------------------------------------------------------------------------

/// Maximum accepted size of a single uploaded document (10 MB).
pub const MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;

/// File extensions accepted for KYC documents (lowercase, without dot).
pub const ALLOWED_DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "jpg", "jpeg", "png"];

/// Multipart field name of the identity document.
pub const FIELD_ID_DOCUMENT: &str = "id_document";
/// Multipart field name of the business registration document.
pub const FIELD_BUSINESS_DOCUMENT: &str = "business_document";
/// Multipart field name used for each optional additional document.
pub const FIELD_ADDITIONAL_DOCUMENTS: &str = "additional_documents";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
}

impl KycStatus {
    pub const ALL: [KycStatus; 4] = [
        KycStatus::Pending,
        KycStatus::UnderReview,
        KycStatus::Approved,
        KycStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::Pending => "pending",
            KycStatus::UnderReview => "under_review",
            KycStatus::Approved => "approved",
            KycStatus::Rejected => "rejected",
        }
    }

    /// A reviewer decision has been recorded; no further review is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, KycStatus::Approved | KycStatus::Rejected)
    }

    /// Review actions a client may offer for an application in this status.
    ///
    /// - `pending`      -> approve, reject
    /// - `under_review` -> approve, reject
    /// - `approved`, `rejected` -> none
    ///
    /// `pending -> under_review` happens on the backend and is never
    /// requested by the client.
    pub fn allowed_actions(&self) -> &'static [ReviewAction] {
        match self {
            KycStatus::Pending | KycStatus::UnderReview => {
                &[ReviewAction::Approve, ReviewAction::Reject]
            }
            KycStatus::Approved | KycStatus::Rejected => &[],
        }
    }
}

impl fmt::Display for KycStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KycStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KycStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Invalid KYC status '{s}'. Must be one of: pending, under_review, approved, rejected"
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Review actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
        }
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate that `action` may be applied to an application currently in
/// `status`.
pub fn validate_transition(status: KycStatus, action: ReviewAction) -> Result<(), CoreError> {
    if status.allowed_actions().contains(&action) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { status, action })
    }
}

/// Body of `POST /kyc/review/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewDecision {
    pub action: ReviewAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl ReviewDecision {
    pub fn approve(notes: Option<String>) -> Self {
        Self {
            action: ReviewAction::Approve,
            notes,
            rejection_reason: None,
        }
    }

    pub fn reject(rejection_reason: impl Into<String>, notes: Option<String>) -> Self {
        Self {
            action: ReviewAction::Reject,
            notes,
            rejection_reason: Some(rejection_reason.into()),
        }
    }

    /// A rejection must carry a non-blank reason.
    pub fn validate(&self) -> Result<(), CoreError> {
        let has_reason = self
            .rejection_reason
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty());
        if self.action == ReviewAction::Reject && !has_reason {
            return Err(CoreError::MissingRejectionReason);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Resubmission policy
// ---------------------------------------------------------------------------

/// Whether an owner whose application was rejected may submit a new one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResubmissionPolicy {
    /// A `rejected` application does not block a new submission.
    #[default]
    AllowAfterRejection,
    /// Any existing application blocks a new submission.
    Never,
}

impl FromStr for ResubmissionPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow_after_rejection" => Ok(ResubmissionPolicy::AllowAfterRejection),
            "never" => Ok(ResubmissionPolicy::Never),
            other => Err(CoreError::Validation(format!(
                "Invalid resubmission policy '{other}'. Must be one of: allow_after_rejection, never"
            ))),
        }
    }
}

/// Decide whether a new submission is allowed given the owner's existing
/// application, if any.
pub fn check_submission_allowed(
    existing: Option<KycStatus>,
    policy: ResubmissionPolicy,
) -> Result<(), CoreError> {
    match (existing, policy) {
        (None, _) => Ok(()),
        (Some(KycStatus::Rejected), ResubmissionPolicy::AllowAfterRejection) => Ok(()),
        (Some(status), _) => Err(CoreError::DuplicateApplication(format!(
            "KYC application already exists with status: {status}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Submission input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessType {
    #[default]
    Individual,
    Company,
    Partnership,
}

impl BusinessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessType::Individual => "individual",
            BusinessType::Company => "company",
            BusinessType::Partnership => "partnership",
        }
    }
}

/// Form fields of a KYC submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Validate)]
pub struct KycForm {
    #[validate(length(min = 1, message = "is required"))]
    pub business_name: String,
    pub business_type: BusinessType,
    pub tax_id: Option<String>,
    #[validate(length(min = 1, message = "is required"))]
    pub address: String,
    #[validate(length(min = 1, message = "is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "is required"))]
    pub state: String,
    #[validate(length(min = 1, message = "is required"))]
    pub country: String,
    #[validate(length(min = 1, message = "is required"))]
    pub postal_code: String,
}

impl KycForm {
    /// Text fields in the order they are sent as multipart parts. An unset
    /// or blank `tax_id` is omitted.
    pub fn text_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("business_name", self.business_name.trim().to_string()),
            ("business_type", self.business_type.as_str().to_string()),
            ("address", self.address.trim().to_string()),
            ("city", self.city.trim().to_string()),
            ("state", self.state.trim().to_string()),
            ("country", self.country.trim().to_string()),
            ("postal_code", self.postal_code.trim().to_string()),
        ];
        if let Some(tax_id) = self.tax_id.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            fields.push(("tax_id", tax_id.to_string()));
        }
        fields
    }

    fn issues(&self) -> Vec<FieldIssue> {
        let mut issues = validation::collect_issues(self);
        // Whitespace-only values pass the length rule but are still missing.
        for (name, value) in [
            ("business_name", &self.business_name),
            ("address", &self.address),
            ("city", &self.city),
            ("state", &self.state),
            ("country", &self.country),
            ("postal_code", &self.postal_code),
        ] {
            if !value.is_empty() && value.trim().is_empty() {
                issues.push(FieldIssue::new(name, "is required"));
            }
        }
        issues
    }
}

/// An in-memory document staged for upload.
#[derive(Clone, PartialEq, Eq)]
pub struct DocumentUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl DocumentUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Lowercased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }

    fn issues(&self, field: &str) -> Vec<FieldIssue> {
        let mut issues = Vec::new();
        if self.bytes.is_empty() {
            issues.push(FieldIssue::new(field, "file is empty"));
        }
        if self.bytes.len() > MAX_DOCUMENT_BYTES {
            issues.push(FieldIssue::new(
                field,
                format!(
                    "file is {} bytes; the maximum is {MAX_DOCUMENT_BYTES}",
                    self.bytes.len()
                ),
            ));
        }
        match self.extension() {
            Some(ext) if ALLOWED_DOCUMENT_EXTENSIONS.contains(&ext.as_str()) => {}
            Some(ext) => issues.push(FieldIssue::new(
                field,
                format!(
                    "file type '.{ext}' is not allowed; allowed: {}",
                    ALLOWED_DOCUMENT_EXTENSIONS.join(", ")
                ),
            )),
            None => issues.push(FieldIssue::new(field, "file name has no extension")),
        }
        issues
    }
}

impl fmt::Debug for DocumentUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentUpload")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Documents accompanying a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KycDocuments {
    pub id_document: Option<DocumentUpload>,
    pub business_document: Option<DocumentUpload>,
    pub additional: Vec<DocumentUpload>,
}

impl KycDocuments {
    pub fn new(id_document: DocumentUpload, business_document: DocumentUpload) -> Self {
        Self {
            id_document: Some(id_document),
            business_document: Some(business_document),
            additional: Vec::new(),
        }
    }

    pub fn with_additional(mut self, document: DocumentUpload) -> Self {
        self.additional.push(document);
        self
    }

    fn issues(&self) -> Vec<FieldIssue> {
        let mut issues = Vec::new();
        for (field, doc) in [
            (FIELD_ID_DOCUMENT, &self.id_document),
            (FIELD_BUSINESS_DOCUMENT, &self.business_document),
        ] {
            match doc {
                Some(doc) => issues.extend(doc.issues(field)),
                None => issues.push(FieldIssue::new(field, "is required")),
            }
        }
        for (index, doc) in self.additional.iter().enumerate() {
            issues.extend(doc.issues(&format!("{FIELD_ADDITIONAL_DOCUMENTS}[{index}]")));
        }
        issues
    }
}

/// Validate a submission, reporting every missing or malformed field and
/// document at once.
pub fn validate_submission(form: &KycForm, documents: &KycDocuments) -> Result<(), CoreError> {
    let mut issues = form.issues();
    issues.extend(documents.issues());
    validation::into_result(issues)
}

// ---------------------------------------------------------------------------
// Application records
// ---------------------------------------------------------------------------

/// Which stored document of an application to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    IdDocument,
    BusinessDocument,
    /// Zero-based index into the application's additional documents.
    Additional(usize),
}

impl DocumentKind {
    /// Path segment used by `GET /kyc/download/{id}/{kind}`.
    pub fn path_segment(&self) -> String {
        match self {
            DocumentKind::IdDocument => FIELD_ID_DOCUMENT.to_string(),
            DocumentKind::BusinessDocument => FIELD_BUSINESS_DOCUMENT.to_string(),
            DocumentKind::Additional(index) => format!("additional_{index}"),
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path_segment())
    }
}

impl FromStr for DocumentKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            FIELD_ID_DOCUMENT => Ok(DocumentKind::IdDocument),
            FIELD_BUSINESS_DOCUMENT => Ok(DocumentKind::BusinessDocument),
            other => other
                .strip_prefix("additional_")
                .and_then(|i| i.parse().ok())
                .map(DocumentKind::Additional)
                .ok_or_else(|| CoreError::Validation(format!("Unknown document kind '{other}'"))),
        }
    }
}

/// Metadata of a stored (encrypted) document, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycDocumentRef {
    pub filename: String,
    pub original_filename: String,
    pub file_size: u64,
    #[serde(default)]
    pub encrypted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessAddress {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub postal_code: String,
}

/// A seller's verification application as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycApplication {
    pub id: EntityId,
    #[serde(rename = "user_id")]
    pub owner_id: EntityId,
    pub business_name: String,
    pub business_type: BusinessType,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(flatten)]
    pub address: BusinessAddress,
    pub status: KycStatus,
    #[serde(default)]
    pub id_document: Option<KycDocumentRef>,
    #[serde(default)]
    pub business_document: Option<KycDocumentRef>,
    #[serde(default)]
    pub additional_documents: Vec<KycDocumentRef>,
    #[serde(default)]
    pub review_notes: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(with = "utc_timestamp")]
    pub submitted_at: Timestamp,
    #[serde(default, with = "utc_timestamp::option")]
    pub reviewed_at: Option<Timestamp>,
}

impl KycApplication {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Review actions still available for this application.
    pub fn available_actions(&self) -> &'static [ReviewAction] {
        self.status.allowed_actions()
    }

    /// An approved application unlocks seller capabilities.
    pub fn grants_seller_capabilities(&self) -> bool {
        self.status == KycStatus::Approved
    }
}

/// Application counts by status, from `GET /kyc/stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycStats {
    pub total: u64,
    pub pending: u64,
    pub under_review: u64,
    pub approved: u64,
    pub rejected: u64,
}

impl KycStats {
    pub fn count(&self, status: KycStatus) -> u64 {
        match status {
            KycStatus::Pending => self.pending,
            KycStatus::UnderReview => self.under_review,
            KycStatus::Approved => self.approved,
            KycStatus::Rejected => self.rejected,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
