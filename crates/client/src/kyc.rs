//! Seller verification workflow over the backend's `/kyc` endpoints.
//!
//! The backend decides every status change. This layer validates input,
//! refuses actions the observed status no longer permits, and re-reads the
//! application after each review decision.

use hamro_core::kyc::{
    self, DocumentKind, DocumentUpload, KycApplication, KycDocuments, KycForm, KycStats,
    KycStatus, ReviewDecision, FIELD_ADDITIONAL_DOCUMENTS, FIELD_BUSINESS_DOCUMENT,
    FIELD_ID_DOCUMENT,
};
use hamro_core::CoreError;
use reqwest::multipart::{Form, Part};
use serde::Serialize;

use crate::error::{ClientError, ClientResult};
use crate::http::AuthorizingClient;

/// Backend page size when none is given.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Prefix of the backend's duplicate-submission message.
const DUPLICATE_DETAIL_PREFIX: &str = "KYC application already exists";

/// Pagination for the reviewer listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub skip: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

#[derive(Serialize)]
struct ListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    status_filter: Option<KycStatus>,
    skip: u32,
    limit: u32,
}

#[derive(Clone)]
pub struct KycWorkflow {
    api: AuthorizingClient,
}

impl KycWorkflow {
    pub fn new(api: AuthorizingClient) -> Self {
        Self { api }
    }

    // ---- owner operations ----

    /// Submit a new application and return the record the backend created.
    ///
    /// Checks the caller's existing application against the configured
    /// resubmission policy before uploading anything. The returned record is
    /// the apply response itself; `my-application` may still report an
    /// earlier rejected application after a resubmission.
    pub async fn submit(
        &self,
        form: &KycForm,
        documents: &KycDocuments,
    ) -> ClientResult<KycApplication> {
        kyc::validate_submission(form, documents)?;

        let existing = self.get_mine().await?.map(|app| app.status);
        let policy = self.api.session().config().resubmission_policy;
        kyc::check_submission_allowed(existing, policy)?;

        let application: KycApplication = self
            .api
            .post_multipart("/kyc/apply", || build_form(form, documents))
            .await
            .map_err(classify_duplicate)?;

        tracing::info!(kyc_id = %application.id, "KYC application submitted");
        Ok(application)
    }

    /// The caller's application, or `None` if they have not applied.
    pub async fn get_mine(&self) -> ClientResult<Option<KycApplication>> {
        match self.api.get_json("/kyc/my-application").await {
            Ok(app) => Ok(Some(app)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ---- reviewer operations ----

    pub async fn list(
        &self,
        status_filter: Option<KycStatus>,
        page: Page,
    ) -> ClientResult<Vec<KycApplication>> {
        self.require_reviewer().await?;
        let query = ListQuery {
            status_filter,
            skip: page.skip,
            limit: page.limit,
        };
        self.api
            .get_json_with_query("/kyc/applications", &query)
            .await
    }

    pub async fn get(&self, application_id: &str) -> ClientResult<KycApplication> {
        self.require_reviewer().await?;
        self.api
            .get_json(&format!("/kyc/applications/{application_id}"))
            .await
    }

    pub async fn stats(&self) -> ClientResult<KycStats> {
        self.require_reviewer().await?;
        self.api.get_json("/kyc/stats").await
    }

    /// Record a reviewer decision and return the re-read application.
    ///
    /// Fails without contacting the backend's review endpoint if a
    /// rejection has no reason or the application is already terminal.
    pub async fn review(
        &self,
        application_id: &str,
        decision: &ReviewDecision,
    ) -> ClientResult<KycApplication> {
        self.require_reviewer().await?;
        decision.validate()?;

        let current = self.get(application_id).await?;
        kyc::validate_transition(current.status, decision.action)?;

        let _: serde_json::Value = self
            .api
            .post_json(&format!("/kyc/review/{application_id}"), decision)
            .await?;

        let updated = self.get(application_id).await?;
        tracing::info!(
            kyc_id = application_id,
            action = %decision.action,
            status = %updated.status,
            "KYC application reviewed",
        );
        Ok(updated)
    }

    /// Download a stored document as opaque bytes.
    pub async fn download_document(
        &self,
        application_id: &str,
        kind: DocumentKind,
    ) -> ClientResult<Vec<u8>> {
        self.require_reviewer().await?;
        self.api
            .get_bytes(&format!(
                "/kyc/download/{application_id}/{}",
                kind.path_segment()
            ))
            .await
    }

    /// Reviewer operations are refused locally when the cached identity is
    /// known and not an admin. An unknown identity defers to the backend.
    async fn require_reviewer(&self) -> ClientResult<()> {
        match self.api.session().role().await {
            Some(role) if !role.can_review_kyc() => Err(CoreError::Forbidden(
                "KYC review requires the admin role".into(),
            )
            .into()),
            _ => Ok(()),
        }
    }
}

fn document_part(doc: &DocumentUpload) -> Part {
    Part::bytes(doc.bytes.clone()).file_name(doc.file_name.clone())
}

fn build_form(form: &KycForm, documents: &KycDocuments) -> Form {
    let mut multipart = Form::new();
    for (name, value) in form.text_fields() {
        multipart = multipart.text(name, value);
    }
    if let Some(doc) = &documents.id_document {
        multipart = multipart.part(FIELD_ID_DOCUMENT, document_part(doc));
    }
    if let Some(doc) = &documents.business_document {
        multipart = multipart.part(FIELD_BUSINESS_DOCUMENT, document_part(doc));
    }
    for doc in &documents.additional {
        multipart = multipart.part(FIELD_ADDITIONAL_DOCUMENTS, document_part(doc));
    }
    multipart
}

/// The backend reports a duplicate as a plain 400; surface it as the
/// domain error.
fn classify_duplicate(err: ClientError) -> ClientError {
    match err {
        ClientError::Validation(message) if message.starts_with(DUPLICATE_DETAIL_PREFIX) => {
            CoreError::DuplicateApplication(message).into()
        }
        other => other,
    }
}
