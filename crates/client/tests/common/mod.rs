//! In-process mock of the marketplace backend for integration tests.
//!
//! Serves the `/api/auth`, `/api/kyc`, and `/api/notifications` routes the
//! client consumes, from in-memory state, on an ephemeral local port. Tokens
//! are issued as `access-N` / `refresh-N` and rotate on refresh. Every route
//! counts its hits so tests can assert exactly how often the client called it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use hamro_client::{ClientConfig, CredentialStore, Marketplace, MemoryCredentialStore};
use hamro_core::identity::TokenPair;
use hamro_core::kyc::{BusinessType, DocumentUpload, KycDocuments, KycForm};

pub const SELLER_EMAIL: &str = "seller@hamro.test";
pub const ADMIN_EMAIL: &str = "admin@hamro.test";
pub const PASSWORD: &str = "correct-horse-battery";
pub const VALID_OTP: &str = "123456";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct MockUser {
    id: String,
    email: String,
    password: String,
    full_name: String,
    phone: Option<String>,
    role: String,
    is_verified: bool,
    phone_verified: bool,
}

impl MockUser {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "email": self.email,
            "phone": self.phone,
            "full_name": self.full_name,
            "role": self.role,
            "is_active": true,
            "is_verified": self.is_verified,
            "phone_verified": self.phone_verified,
            "created_at": now(),
        })
    }
}

#[derive(Default)]
pub struct MockState {
    users: Mutex<Vec<MockUser>>,
    access_tokens: Mutex<HashMap<String, String>>,
    refresh_tokens: Mutex<HashMap<String, String>>,
    next_token: AtomicUsize,
    next_id: AtomicUsize,
    kyc: Mutex<Vec<Value>>,
    documents: Mutex<HashMap<(String, String), Vec<u8>>>,
    notifications: Mutex<Vec<(String, Value)>>,
    hits: Mutex<HashMap<&'static str, usize>>,
    refresh_delay: Mutex<Duration>,
    refresh_response_delay: Mutex<Duration>,
    me_failure: Mutex<Option<StatusCode>>,
    unread_failure: Mutex<Option<StatusCode>>,
}

impl MockState {
    fn hit(&self, route: &'static str) {
        *self.hits.lock().unwrap().entry(route).or_default() += 1;
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn issue_tokens(&self, user_id: &str) -> (String, String) {
        let n = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("access-{n}");
        let refresh = format!("refresh-{n}");
        self.access_tokens
            .lock()
            .unwrap()
            .insert(access.clone(), user_id.to_string());
        self.refresh_tokens
            .lock()
            .unwrap()
            .insert(refresh.clone(), user_id.to_string());
        (access, refresh)
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<MockUser, Response> {
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| detail(StatusCode::UNAUTHORIZED, "Not authenticated"))?;
        let user_id = self
            .access_tokens
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| detail(StatusCode::UNAUTHORIZED, "Could not validate credentials"))?;
        self.user_by_id(&user_id)
            .ok_or_else(|| detail(StatusCode::UNAUTHORIZED, "User not found"))
    }

    fn require_admin(&self, headers: &HeaderMap) -> Result<MockUser, Response> {
        let user = self.authenticate(headers)?;
        if user.role != "admin" {
            return Err(detail(StatusCode::FORBIDDEN, "Admin access required"));
        }
        Ok(user)
    }

    fn user_by_id(&self, id: &str) -> Option<MockUser> {
        self.users.lock().unwrap().iter().find(|u| u.id == id).cloned()
    }

    fn update_user(&self, id: &str, f: impl FnOnce(&mut MockUser)) {
        if let Some(user) = self.users.lock().unwrap().iter_mut().find(|u| u.id == id) {
            f(user);
        }
    }
}

fn now() -> String {
    chrono::Utc::now()
        .naive_utc()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

fn message(text: &str) -> Response {
    Json(json!({ "message": text })).into_response()
}

type Shared = State<Arc<MockState>>;

macro_rules! try_auth {
    ($expr:expr) => {
        match $expr {
            Ok(user) => user,
            Err(response) => return response,
        }
    };
}

// ---------------------------------------------------------------------------
// Auth routes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RegisterBody {
    email: String,
    password: String,
    full_name: String,
    phone: Option<String>,
}

async fn register(State(state): Shared, Json(body): Json<RegisterBody>) -> Response {
    state.hit("register");
    if state
        .users
        .lock()
        .unwrap()
        .iter()
        .any(|u| u.email == body.email)
    {
        return detail(StatusCode::BAD_REQUEST, "Email already registered");
    }
    let user = MockUser {
        id: state.next_id("user"),
        email: body.email,
        password: body.password,
        full_name: body.full_name,
        phone: body.phone,
        role: "user".into(),
        is_verified: false,
        phone_verified: false,
    };
    let json = user.to_json();
    state.users.lock().unwrap().push(user);
    Json(json).into_response()
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(State(state): Shared, Json(body): Json<LoginBody>) -> Response {
    state.hit("login");
    let user = state
        .users
        .lock()
        .unwrap()
        .iter()
        .find(|u| u.email == body.email && u.password == body.password)
        .cloned();
    let Some(user) = user else {
        return detail(StatusCode::UNAUTHORIZED, "Incorrect email or password");
    };
    let (access, refresh) = state.issue_tokens(&user.id);
    Json(json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "user": user.to_json(),
    }))
    .into_response()
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh_token: String,
}

async fn refresh(State(state): Shared, Json(body): Json<RefreshBody>) -> Response {
    state.hit("refresh");
    let delay = *state.refresh_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let user_id = state
        .refresh_tokens
        .lock()
        .unwrap()
        .remove(&body.refresh_token);
    let Some(user_id) = user_id else {
        return detail(StatusCode::UNAUTHORIZED, "Invalid refresh token");
    };
    let (access, refresh) = state.issue_tokens(&user_id);
    let latency = *state.refresh_response_delay.lock().unwrap();
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
    Json(json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
    }))
    .into_response()
}

async fn logout(State(state): Shared, Json(body): Json<RefreshBody>) -> Response {
    state.hit("logout");
    state
        .refresh_tokens
        .lock()
        .unwrap()
        .remove(&body.refresh_token);
    message("Logged out successfully")
}

async fn me(State(state): Shared, headers: HeaderMap) -> Response {
    state.hit("me");
    if let Some(status) = *state.me_failure.lock().unwrap() {
        return detail(status, "Injected failure");
    }
    let user = try_auth!(state.authenticate(&headers));
    Json(user.to_json()).into_response()
}

#[derive(Deserialize)]
struct ProfileBody {
    full_name: Option<String>,
    phone: Option<String>,
}

async fn update_me(
    State(state): Shared,
    headers: HeaderMap,
    Json(body): Json<ProfileBody>,
) -> Response {
    state.hit("update_me");
    let user = try_auth!(state.authenticate(&headers));
    state.update_user(&user.id, |u| {
        if let Some(name) = body.full_name {
            u.full_name = name;
        }
        if let Some(phone) = body.phone {
            u.phone = Some(phone);
        }
    });
    Json(state.user_by_id(&user.id).map(|u| u.to_json())).into_response()
}

#[derive(Deserialize)]
struct EmailTokenBody {
    token: String,
}

/// Email tokens have the form `verify:{email}`.
async fn verify_email(State(state): Shared, Json(body): Json<EmailTokenBody>) -> Response {
    state.hit("verify_email");
    let Some(email) = body.token.strip_prefix("verify:") else {
        return detail(StatusCode::BAD_REQUEST, "Invalid or expired token");
    };
    let user = state
        .users
        .lock()
        .unwrap()
        .iter()
        .find(|u| u.email == email)
        .cloned();
    match user {
        Some(user) => {
            state.update_user(&user.id, |u| u.is_verified = true);
            message("Email verified successfully")
        }
        None => detail(StatusCode::BAD_REQUEST, "Invalid or expired token"),
    }
}

#[derive(Deserialize)]
struct OtpBody {
    phone: String,
    otp: Option<String>,
}

async fn send_otp(State(state): Shared, headers: HeaderMap, Json(_body): Json<OtpBody>) -> Response {
    state.hit("send_otp");
    try_auth!(state.authenticate(&headers));
    message("OTP sent successfully")
}

async fn verify_otp(State(state): Shared, headers: HeaderMap, Json(body): Json<OtpBody>) -> Response {
    state.hit("verify_otp");
    let user = try_auth!(state.authenticate(&headers));
    if body.otp.as_deref() != Some(VALID_OTP) {
        return detail(StatusCode::BAD_REQUEST, "Invalid OTP");
    }
    state.update_user(&user.id, |u| {
        u.phone = Some(body.phone);
        u.phone_verified = true;
    });
    message("Phone verified successfully")
}

// ---------------------------------------------------------------------------
// KYC routes
// ---------------------------------------------------------------------------

/// Fields of a stored application the backend exposes in its responses.
/// Address, tax id, and document metadata stay server-side.
const APPLICATION_RESPONSE_FIELDS: [&str; 9] = [
    "id",
    "user_id",
    "business_name",
    "business_type",
    "status",
    "submitted_at",
    "reviewed_at",
    "review_notes",
    "rejection_reason",
];

fn application_response(record: &Value) -> Value {
    let fields = APPLICATION_RESPONSE_FIELDS
        .iter()
        .map(|field| (field.to_string(), record[*field].clone()))
        .collect::<serde_json::Map<_, _>>();
    Value::Object(fields)
}

async fn kyc_apply(State(state): Shared, headers: HeaderMap, mut multipart: Multipart) -> Response {
    state.hit("kyc_apply");
    let user = try_auth!(state.authenticate(&headers));

    let existing_status: Option<String> = {
        let kyc = state.kyc.lock().unwrap();
        kyc.iter()
            .find(|k| k["user_id"] == user.id.as_str())
            .and_then(|k| k["status"].as_str().map(str::to_string))
    };
    if let Some(status) = existing_status.filter(|s| s != "rejected") {
        return detail(
            StatusCode::BAD_REQUEST,
            &format!("KYC application already exists with status: {status}"),
        );
    }

    let mut fields = serde_json::Map::new();
    let mut files: Vec<(String, String, Vec<u8>)> = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let bytes = field.bytes().await.unwrap().to_vec();
                files.push((name, file_name, bytes));
            }
            None => {
                let text = field.text().await.unwrap();
                fields.insert(name, Value::String(text));
            }
        }
    }

    let kyc_id = state.next_id("kyc");
    let doc_ref = |file_name: &str, bytes: &[u8]| {
        json!({
            "filename": format!("{kyc_id}-{file_name}.enc"),
            "original_filename": file_name,
            "file_size": bytes.len(),
            "encrypted": true,
        })
    };

    let mut record = json!({
        "id": kyc_id,
        "user_id": user.id,
        "business_name": fields.get("business_name"),
        "business_type": fields.get("business_type"),
        "tax_id": fields.get("tax_id"),
        "address": fields.get("address"),
        "city": fields.get("city"),
        "state": fields.get("state"),
        "country": fields.get("country"),
        "postal_code": fields.get("postal_code"),
        "status": "pending",
        "additional_documents": [],
        "review_notes": null,
        "rejection_reason": null,
        "submitted_at": now(),
        "reviewed_at": null,
    });

    let mut documents = state.documents.lock().unwrap();
    let mut additional = 0;
    for (name, file_name, bytes) in files {
        let key = match name.as_str() {
            "additional_documents" => {
                record["additional_documents"]
                    .as_array_mut()
                    .unwrap()
                    .push(doc_ref(&file_name, &bytes));
                additional += 1;
                format!("additional_{}", additional - 1)
            }
            other => {
                record[other] = doc_ref(&file_name, &bytes);
                other.to_string()
            }
        };
        documents.insert((kyc_id.clone(), key), bytes);
    }
    drop(documents);

    // earlier (rejected) applications are kept alongside the new one
    let response = application_response(&record);
    state.kyc.lock().unwrap().push(record);

    (StatusCode::CREATED, Json(response)).into_response()
}

async fn kyc_mine(State(state): Shared, headers: HeaderMap) -> Response {
    state.hit("kyc_mine");
    let user = try_auth!(state.authenticate(&headers));
    // first stored match, like the backend's `find_one({"user_id"})`
    let kyc = state.kyc.lock().unwrap();
    match kyc.iter().find(|k| k["user_id"] == user.id.as_str()) {
        Some(record) => Json(application_response(record)).into_response(),
        None => detail(StatusCode::NOT_FOUND, "No KYC application found"),
    }
}

#[derive(Deserialize)]
struct ListParams {
    status_filter: Option<String>,
    skip: Option<usize>,
    limit: Option<usize>,
}

async fn kyc_list(
    State(state): Shared,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Response {
    state.hit("kyc_list");
    try_auth!(state.require_admin(&headers));
    let kyc = state.kyc.lock().unwrap();
    let list: Vec<Value> = kyc
        .iter()
        .filter(|k| {
            params
                .status_filter
                .as_deref()
                .map_or(true, |s| k["status"] == s)
        })
        .skip(params.skip.unwrap_or(0))
        .take(params.limit.unwrap_or(20))
        .map(application_response)
        .collect();
    Json(list).into_response()
}

async fn kyc_get(State(state): Shared, headers: HeaderMap, Path(id): Path<String>) -> Response {
    state.hit("kyc_get");
    try_auth!(state.require_admin(&headers));
    let kyc = state.kyc.lock().unwrap();
    match kyc.iter().find(|k| k["id"] == id.as_str()) {
        Some(record) => Json(application_response(record)).into_response(),
        None => detail(StatusCode::NOT_FOUND, "KYC application not found"),
    }
}

async fn kyc_stats(State(state): Shared, headers: HeaderMap) -> Response {
    state.hit("kyc_stats");
    try_auth!(state.require_admin(&headers));
    let kyc = state.kyc.lock().unwrap();
    let count = |status: &str| kyc.iter().filter(|k| k["status"] == status).count();
    Json(json!({
        "total": kyc.len(),
        "pending": count("pending"),
        "under_review": count("under_review"),
        "approved": count("approved"),
        "rejected": count("rejected"),
    }))
    .into_response()
}

#[derive(Deserialize)]
struct ReviewBody {
    action: String,
    notes: Option<String>,
    rejection_reason: Option<String>,
}

async fn kyc_review(
    State(state): Shared,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ReviewBody>,
) -> Response {
    state.hit("kyc_review");
    let admin = try_auth!(state.require_admin(&headers));
    let status = match body.action.as_str() {
        "approve" => "approved",
        "reject" => "rejected",
        _ => return detail(StatusCode::BAD_REQUEST, "Invalid action"),
    };

    let mut kyc = state.kyc.lock().unwrap();
    let Some(record) = kyc.iter_mut().find(|k| k["id"] == id.as_str()) else {
        return detail(StatusCode::NOT_FOUND, "KYC application not found");
    };
    record["status"] = json!(status);
    record["review_notes"] = json!(body.notes);
    record["reviewed_by"] = json!(admin.id);
    record["reviewed_at"] = json!(now());
    if status == "rejected" && body.rejection_reason.is_some() {
        record["rejection_reason"] = json!(body.rejection_reason);
    }

    Json(json!({
        "message": format!("KYC application {status}"),
        "kyc_id": id,
        "status": status,
    }))
    .into_response()
}

async fn kyc_download(
    State(state): Shared,
    headers: HeaderMap,
    Path((id, document_type)): Path<(String, String)>,
) -> Response {
    state.hit("kyc_download");
    try_auth!(state.require_admin(&headers));
    match state.documents.lock().unwrap().get(&(id, document_type)) {
        Some(bytes) => (
            [("content-type", "application/octet-stream")],
            bytes.clone(),
        )
            .into_response(),
        None => detail(StatusCode::NOT_FOUND, "Document not found"),
    }
}

// ---------------------------------------------------------------------------
// Notification routes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct FeedParams {
    limit: Option<usize>,
}

async fn notifications_list(
    State(state): Shared,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> Response {
    state.hit("notifications_list");
    let user = try_auth!(state.authenticate(&headers));
    let all = state.notifications.lock().unwrap();
    let feed: Vec<Value> = all
        .iter()
        .rev()
        .filter(|(owner, _)| *owner == user.id)
        .take(params.limit.unwrap_or(50))
        .map(|(_, n)| n.clone())
        .collect();
    Json(feed).into_response()
}

async fn unread_count(State(state): Shared, headers: HeaderMap) -> Response {
    state.hit("unread_count");
    if let Some(status) = *state.unread_failure.lock().unwrap() {
        return detail(status, "Injected failure");
    }
    let user = try_auth!(state.authenticate(&headers));
    let count = state
        .notifications
        .lock()
        .unwrap()
        .iter()
        .filter(|(owner, n)| *owner == user.id && n["is_read"] == false)
        .count();
    Json(json!({ "count": count })).into_response()
}

async fn mark_read(State(state): Shared, headers: HeaderMap, Path(id): Path<String>) -> Response {
    state.hit("mark_read");
    let user = try_auth!(state.authenticate(&headers));
    let mut all = state.notifications.lock().unwrap();
    let modified = all
        .iter_mut()
        .find(|(owner, n)| *owner == user.id && n["id"] == id.as_str() && n["is_read"] == false)
        .map(|(_, n)| n["is_read"] = json!(true))
        .is_some();
    if modified {
        message("Notification marked as read")
    } else {
        detail(StatusCode::NOT_FOUND, "Notification not found")
    }
}

async fn mark_all_read(State(state): Shared, headers: HeaderMap) -> Response {
    state.hit("mark_all_read");
    let user = try_auth!(state.authenticate(&headers));
    let mut all = state.notifications.lock().unwrap();
    for (_, n) in all.iter_mut().filter(|(owner, _)| *owner == user.id) {
        n["is_read"] = json!(true);
    }
    message("All notifications marked as read")
}

async fn delete_notification(
    State(state): Shared,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    state.hit("delete_notification");
    let user = try_auth!(state.authenticate(&headers));
    let mut all = state.notifications.lock().unwrap();
    let before = all.len();
    all.retain(|(owner, n)| !(*owner == user.id && n["id"] == id.as_str()));
    if all.len() < before {
        message("Notification deleted")
    } else {
        detail(StatusCode::NOT_FOUND, "Notification not found")
    }
}

fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me).put(update_me))
        .route("/api/auth/verify-email", post(verify_email))
        .route("/api/auth/send-otp", post(send_otp))
        .route("/api/auth/verify-otp", post(verify_otp))
        .route("/api/kyc/apply", post(kyc_apply))
        .route("/api/kyc/my-application", get(kyc_mine))
        .route("/api/kyc/applications", get(kyc_list))
        .route("/api/kyc/applications/{id}", get(kyc_get))
        .route("/api/kyc/stats", get(kyc_stats))
        .route("/api/kyc/review/{id}", post(kyc_review))
        .route("/api/kyc/download/{id}/{document_type}", get(kyc_download))
        .route("/api/notifications", get(notifications_list))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/mark-all-read", put(mark_all_read))
        .route("/api/notifications/{id}/read", put(mark_read))
        .route("/api/notifications/{id}", delete(delete_notification))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct MockBackend {
    addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockBackend {
    /// Serve the mock on `127.0.0.1:0` with a seller and an admin account.
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::clone(&state));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let backend = Self { addr, state };
        backend.add_user(SELLER_EMAIL, "Sita Sharma", "seller");
        backend.add_user(ADMIN_EMAIL, "Admin User", "admin");
        backend
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client configuration pointed at this backend with a fast poll interval.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(&self.url());
        config.poll_interval = Duration::from_millis(50);
        config.request_timeout = Duration::from_secs(5);
        config
    }

    /// A fresh client bundle with an empty in-memory store.
    pub fn marketplace(&self) -> (Marketplace, Arc<MemoryCredentialStore>) {
        self.marketplace_with(self.config())
    }

    pub fn marketplace_with(&self, config: ClientConfig) -> (Marketplace, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let market = Marketplace::new(config, Arc::clone(&store) as Arc<dyn CredentialStore>)
            .expect("client builds");
        (market, store)
    }

    pub fn add_user(&self, email: &str, full_name: &str, role: &str) -> String {
        let id = self.state.next_id("user");
        self.state.users.lock().unwrap().push(MockUser {
            id: id.clone(),
            email: email.to_string(),
            password: PASSWORD.to_string(),
            full_name: full_name.to_string(),
            phone: None,
            role: role.to_string(),
            is_verified: false,
            phone_verified: false,
        });
        id
    }

    pub fn user_id(&self, email: &str) -> String {
        self.state
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.id.clone())
            .expect("user exists")
    }

    /// Issue a valid pair directly, as if from an earlier run.
    pub fn issue_tokens(&self, email: &str) -> TokenPair {
        let (access, refresh) = self.state.issue_tokens(&self.user_id(email));
        TokenPair::new(access, refresh)
    }

    /// Invalidate every access token; refresh tokens stay valid.
    pub fn expire_access_tokens(&self) {
        self.state.access_tokens.lock().unwrap().clear();
    }

    /// Invalidate every refresh token.
    pub fn revoke_refresh_tokens(&self) {
        self.state.refresh_tokens.lock().unwrap().clear();
    }

    /// Delay `POST /auth/refresh` before it rotates the pair.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.state.refresh_delay.lock().unwrap() = delay;
    }

    /// Delay the refresh response after the pair has been rotated, as a
    /// slow network would.
    pub fn set_refresh_response_delay(&self, delay: Duration) {
        *self.state.refresh_response_delay.lock().unwrap() = delay;
    }

    /// Make `GET /auth/me` answer with `status` until cleared.
    pub fn fail_me_with(&self, status: Option<StatusCode>) {
        *self.state.me_failure.lock().unwrap() = status;
    }

    /// Make `GET /notifications/unread-count` answer with `status` until
    /// cleared.
    pub fn fail_unread_count_with(&self, status: Option<StatusCode>) {
        *self.state.unread_failure.lock().unwrap() = status;
    }

    pub fn set_kyc_status(&self, kyc_id: &str, status: &str) {
        if let Some(record) = self
            .state
            .kyc
            .lock()
            .unwrap()
            .iter_mut()
            .find(|k| k["id"] == kyc_id)
        {
            record["status"] = json!(status);
        }
    }

    /// Every stored application of `email`, oldest first, including the
    /// server-side fields responses leave out.
    pub fn stored_applications(&self, email: &str) -> Vec<Value> {
        let owner = self.user_id(email);
        self.state
            .kyc
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k["user_id"] == owner.as_str())
            .cloned()
            .collect()
    }

    pub fn add_notification(&self, email: &str, title: &str, is_read: bool) -> String {
        let id = self.state.next_id("notification");
        let owner = self.user_id(email);
        self.state.notifications.lock().unwrap().push((
            owner.clone(),
            json!({
                "id": id,
                "user_id": owner,
                "type": "info",
                "title": title,
                "message": format!("{title} details"),
                "is_read": is_read,
                "action_url": null,
                "created_at": now(),
            }),
        ));
        id
    }

    pub fn hits(&self, route: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(route)
            .copied()
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn kyc_form() -> KycForm {
    KycForm {
        business_name: "Himal Handicrafts".into(),
        business_type: BusinessType::Company,
        tax_id: Some("PAN-609876543".into()),
        address: "Thamel Marg 12".into(),
        city: "Kathmandu".into(),
        state: "Bagmati".into(),
        country: "Nepal".into(),
        postal_code: "44600".into(),
    }
}

pub fn kyc_documents() -> KycDocuments {
    KycDocuments::new(
        DocumentUpload::new("citizenship.pdf", b"%PDF-1.7 id".to_vec()),
        DocumentUpload::new("registration.png", b"\x89PNG business".to_vec()),
    )
}

/// Poll `check` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
