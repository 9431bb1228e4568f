//! In-process stand-in for the Firestore REST endpoints the store uses.
use crate::config::FirestoreConfig;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const DATABASE_PATH: &str = "projects/test-project/databases/(default)";

#[derive(Default)]
struct MockState {
    // document name -> fields
    documents: Mutex<BTreeMap<String, Value>>,
    fail_with: Mutex<Option<StatusCode>>,
    abort_commits: Mutex<bool>,
    delay: Mutex<Duration>,
    last_authorization: Mutex<Option<String>>,
}

pub struct MockFirestore {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockFirestore {
    pub async fn spawn() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new().fallback(handler).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockFirestore { addr, state }
    }

    pub fn config(&self) -> FirestoreConfig {
        let mut config = FirestoreConfig::new("test-project");
        config.emulator_host = Some(self.addr.to_string());
        config
    }

    /// The server timestamp the mock assigns to every commit.
    pub fn commit_time(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    pub fn documents(&self) -> Vec<String> {
        self.state.documents.lock().keys().cloned().collect()
    }

    /// Stores a document under an arbitrary ID, bypassing the commit path.
    pub fn seed(&self, id: &str, name: &str, email: &str) {
        self.state.documents.lock().insert(
            format!("{DATABASE_PATH}/documents/airdropQualifiers/{id}"),
            json!({
                "name": { "stringValue": name },
                "email": { "stringValue": email },
                "createdAt": { "timestampValue": "2023-01-01T00:00:00Z" },
            }),
        );
    }

    pub fn fail_with(&self, status: Option<StatusCode>) {
        *self.state.fail_with.lock() = status;
    }

    pub fn abort_commits(&self, abort: bool) {
        *self.state.abort_commits.lock() = abort;
    }

    pub fn delay(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().clone()
    }
}

fn google_error(status: StatusCode, name: &str, message: &str) -> Response {
    let body = json!({
        "error": { "code": status.as_u16(), "message": message, "status": name }
    });
    (status, Json(body)).into_response()
}

async fn handler(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    *state.last_authorization.lock() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let delay = *state.delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let fail_with = *state.fail_with.lock();
    if let Some(status) = fail_with {
        return google_error(status, "INJECTED", "injected failure");
    }

    let path = uri.path();
    if path == format!("/v1/{DATABASE_PATH}/documents:runQuery") {
        run_query(&state, &body)
    } else if path == format!("/v1/{DATABASE_PATH}/documents:commit") {
        commit(&state, &body)
    } else {
        google_error(StatusCode::NOT_FOUND, "NOT_FOUND", "unknown method")
    }
}

fn run_query(state: &MockState, body: &Value) -> Response {
    let query = &body["structuredQuery"];
    let collection = query["from"][0]["collectionId"].as_str().unwrap_or_default();
    let email = &query["where"]["fieldFilter"]["value"]["stringValue"];
    let prefix = format!("{DATABASE_PATH}/documents/{collection}/");

    let documents = state.documents.lock();
    let found = documents
        .iter()
        .find(|(name, fields)| name.starts_with(&prefix) && fields["email"]["stringValue"] == *email);

    let read_time = "2024-05-01T12:00:01Z";
    let results = match found {
        Some((name, fields)) => json!([{
            "document": { "name": name, "fields": fields },
            "readTime": read_time,
        }]),
        None => json!([{ "readTime": read_time }]),
    };
    Json(results).into_response()
}

fn commit(state: &MockState, body: &Value) -> Response {
    if *state.abort_commits.lock() {
        return google_error(StatusCode::CONFLICT, "ABORTED", "too much contention");
    }

    let write = &body["writes"][0];
    let name = write["update"]["name"].as_str().unwrap_or_default().to_string();
    let must_not_exist = write["currentDocument"]["exists"] == json!(false);

    let mut documents = state.documents.lock();
    if must_not_exist && documents.contains_key(&name) {
        return google_error(
            StatusCode::CONFLICT,
            "ALREADY_EXISTS",
            &format!("Document already exists: {name}"),
        );
    }

    let mut fields = write["update"]["fields"].clone();
    if write["updateTransforms"][0]["setToServerValue"] == "REQUEST_TIME" {
        let field = write["updateTransforms"][0]["fieldPath"]
            .as_str()
            .unwrap_or_default();
        fields[field] = json!({ "timestampValue": "2024-05-01T12:00:00.000000Z" });
    }
    documents.insert(name, fields);

    Json(json!({
        "writeResults": [{ "updateTime": "2024-05-01T12:00:00.000000Z" }],
        "commitTime": "2024-05-01T12:00:00.000000Z",
    }))
    .into_response()
}
