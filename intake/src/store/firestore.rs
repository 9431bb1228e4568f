//! Cloud Firestore over the v1 REST API.
//!
//! Records are written with a document ID derived from the email and a
//! `currentDocument.exists = false` precondition, so two racing inserts for
//! one email cannot both succeed. Lookups still query the `email` field so
//! records stored under random IDs are found too.
use super::{InsertOutcome, NewQualifier, QualifierRecord, QualifierStore, StoreError};
use crate::config::FirestoreConfig;
use crate::metrics_defs::STORE_REQUEST_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use google_cloud_auth::credentials::service_account::{self, AccessSpecifier};
use google_cloud_auth::credentials::{self, CacheableResource, Credentials};
use http::header::AUTHORIZATION;
use http::{Extensions, HeaderMap, HeaderValue, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use shared::histogram;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::time::timeout;

const FIRESTORE_URL: &str = "https://firestore.googleapis.com";
const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

#[derive(Deserialize)]
struct RunQueryResult {
    document: Option<Document>,
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    fields: HashMap<String, FieldValue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldValue {
    string_value: Option<String>,
    timestamp_value: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Deserialize, Default)]
struct GoogleError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl Document {
    fn into_record(mut self) -> Result<QualifierRecord, StoreError> {
        let mut string_field = |key: &str| self.fields.remove(key).and_then(|v| v.string_value);

        let email = string_field("email")
            .ok_or_else(|| StoreError::Decode("document has no email field".into()))?;
        let name = string_field("name").unwrap_or_default();
        let created_at = self
            .fields
            .remove("createdAt")
            .and_then(|v| v.timestamp_value);

        Ok(QualifierRecord {
            name,
            email,
            created_at,
        })
    }
}

enum Auth {
    // Emulators accept any bearer token; "owner" bypasses security rules.
    Emulator,
    Google(Credentials),
}

pub struct FirestoreStore {
    client: reqwest::Client,
    auth: Auth,
    // projects/{project}/databases/{database}
    database_path: String,
    // {origin}/v1/{database_path}/documents
    documents_url: String,
    collection: String,
    timeout: Duration,
    // Cleared when the last call could not reach the store or it answered 503.
    reachable: AtomicBool,
}

impl FirestoreStore {
    pub fn new(config: &FirestoreConfig) -> Result<Self, StoreError> {
        let (origin, auth) = match &config.emulator_host {
            Some(host) => (format!("http://{host}"), Auth::Emulator),
            None => (
                FIRESTORE_URL.to_string(),
                Auth::Google(load_credentials(config.credentials_file.as_deref())?),
            ),
        };

        let database_path = format!(
            "projects/{}/databases/{}",
            config.project_id, config.database
        );

        tracing::info!(
            database = %database_path,
            collection = %config.collection,
            emulator = config.emulator_host.is_some(),
            "Using Firestore qualifier store"
        );

        Ok(FirestoreStore {
            client: reqwest::Client::new(),
            auth,
            documents_url: format!("{origin}/v1/{database_path}/documents"),
            database_path,
            collection: config.collection.clone(),
            timeout: config.timeout(),
            reachable: AtomicBool::new(true),
        })
    }

    async fn auth_headers(&self) -> Result<HeaderMap, StoreError> {
        match &self.auth {
            Auth::Emulator => {
                let mut headers = HeaderMap::new();
                headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer owner"));
                Ok(headers)
            }
            Auth::Google(credentials) => match credentials
                .headers(Extensions::new())
                .await
                .map_err(|e| StoreError::Auth(e.to_string()))?
            {
                CacheableResource::New { data, .. } => Ok(data),
                CacheableResource::NotModified => {
                    Err(StoreError::Auth("credentials returned no headers".into()))
                }
            },
        }
    }

    /// Issues one POST under the configured deadline and returns the status
    /// and full body.
    async fn post(
        &self,
        operation: &'static str,
        url: String,
        body: serde_json::Value,
    ) -> Result<(StatusCode, Vec<u8>), StoreError> {
        let started = Instant::now();

        let result = timeout(self.timeout, async {
            let headers = self.auth_headers().await?;
            let response = self
                .client
                .post(&url)
                .headers(headers)
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;
            let status = response.status();
            let bytes = response.bytes().await.map_err(transport_error)?;
            Ok::<_, StoreError>((status, bytes.to_vec()))
        })
        .await
        .unwrap_or(Err(StoreError::Timeout(self.timeout)));

        histogram!(STORE_REQUEST_DURATION, "operation" => operation)
            .record(started.elapsed().as_secs_f64());

        result
    }

    /// Records whether the store answered, once the final outcome of an
    /// operation is known.
    fn track<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        let unreachable = matches!(
            result,
            Err(StoreError::Unavailable(_) | StoreError::Timeout(_))
        );
        self.reachable.store(!unreachable, Ordering::Relaxed);
        result
    }

    async fn run_query(&self, email: &str) -> Result<Option<QualifierRecord>, StoreError> {
        let query = json!({
            "structuredQuery": {
                "from": [{ "collectionId": self.collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": "email" },
                        "op": "EQUAL",
                        "value": { "stringValue": email },
                    }
                },
                "limit": 1,
            }
        });

        let url = format!("{}:runQuery", self.documents_url);
        let (status, body) = self.post("find_by_email", url, query).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        // An empty result is a single element carrying only `readTime`.
        let results: Vec<RunQueryResult> =
            serde_json::from_slice(&body).map_err(|e| StoreError::Decode(e.to_string()))?;

        results
            .into_iter()
            .find_map(|result| result.document)
            .map(Document::into_record)
            .transpose()
    }

    async fn commit(&self, record: NewQualifier) -> Result<InsertOutcome, StoreError> {
        let commit = json!({
            "writes": [{
                "update": {
                    "name": self.document_name(&record.email),
                    "fields": {
                        "name": { "stringValue": record.name },
                        "email": { "stringValue": record.email },
                    },
                },
                "updateTransforms": [{
                    "fieldPath": "createdAt",
                    "setToServerValue": "REQUEST_TIME",
                }],
                "currentDocument": { "exists": false },
            }]
        });

        let url = format!("{}:commit", self.documents_url);
        let (status, body) = self.post("insert", url, commit).await?;

        if status.is_success() {
            return Ok(InsertOutcome::Stored);
        }

        // ABORTED also maps to 409 but means contention, not a duplicate.
        if status == StatusCode::CONFLICT && parse_error(&body).status != "ABORTED" {
            return Ok(InsertOutcome::AlreadyExists);
        }

        Err(status_error(status, &body))
    }

    fn document_name(&self, email: &str) -> String {
        format!(
            "{}/documents/{}/{}",
            self.database_path,
            self.collection,
            document_id(email)
        )
    }
}

#[async_trait]
impl QualifierStore for FirestoreStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<QualifierRecord>, StoreError> {
        self.track(self.run_query(email).await)
    }

    async fn insert(&self, record: NewQualifier) -> Result<InsertOutcome, StoreError> {
        self.track(self.commit(record).await)
    }

    fn is_ready(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }
}

fn load_credentials(path: Option<&Path>) -> Result<Credentials, StoreError> {
    let credentials = match path {
        Some(path) => {
            let key = std::fs::read(path).map_err(|e| {
                StoreError::Auth(format!("could not read {}: {e}", path.display()))
            })?;
            let key: serde_json::Value = serde_json::from_slice(&key)
                .map_err(|e| StoreError::Auth(format!("invalid service account key: {e}")))?;

            service_account::Builder::new(key)
                .with_access_specifier(AccessSpecifier::from_scopes([DATASTORE_SCOPE]))
                .build()
        }
        None => credentials::Builder::default()
            .with_scopes([DATASTORE_SCOPE])
            .build(),
    };

    credentials.map_err(|e| StoreError::Auth(e.to_string()))
}

fn document_id(email: &str) -> String {
    hex::encode(Sha256::digest(email.as_bytes()))
}

fn transport_error(e: reqwest::Error) -> StoreError {
    if e.is_decode() || e.is_body() {
        StoreError::Decode(e.to_string())
    } else {
        StoreError::Unavailable(e.to_string())
    }
}

fn parse_error(body: &[u8]) -> GoogleError {
    serde_json::from_slice::<GoogleErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| GoogleError {
            message: String::from_utf8_lossy(body).into_owned(),
            status: String::new(),
        })
}

fn status_error(status: StatusCode, body: &[u8]) -> StoreError {
    let message = parse_error(body).message;

    match status {
        StatusCode::SERVICE_UNAVAILABLE => StoreError::Unavailable(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Auth(message),
        _ => StoreError::Backend {
            status: status.as_u16(),
            message,
        },
    }
}
