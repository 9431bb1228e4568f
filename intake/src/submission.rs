use crate::store::{InsertOutcome, NewQualifier, QualifierStore, StoreError};
use crate::validation::{Validation, validate};
use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

const INTERNAL_ERROR_TEXT: &str = "Internal server error";

/// The submitted form. Missing or non-string fields arrive here as `None`.
#[derive(Debug, Default)]
pub struct SubmissionRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl SubmissionRequest {
    /// Only `application/json` bodies are read; anything else is an empty
    /// form.
    pub fn from_request(headers: &HeaderMap, body: &[u8]) -> Self {
        if is_json(headers) {
            Self::from_json(body)
        } else {
            Self::default()
        }
    }

    /// Decodes each field on its own. A body that is not a JSON object has
    /// no fields.
    pub fn from_json(body: &[u8]) -> Self {
        let Ok(fields) = serde_json::from_slice::<Map<String, Value>>(body) else {
            return Self::default();
        };
        let field = |key: &str| fields.get(key).and_then(Value::as_str).map(String::from);

        SubmissionRequest {
            name: field("name"),
            email: field("email"),
        }
    }

    fn into_qualifier(self) -> Result<NewQualifier, SubmissionError> {
        match (
            validate(self.name.as_deref(), self.email.as_deref()),
            self.name,
            self.email,
        ) {
            (Validation::Valid, Some(name), Some(email)) => Ok(NewQualifier { name, email }),
            (Validation::InvalidEmail, _, _) => Err(SubmissionError::InvalidEmail),
            _ => Err(SubmissionError::InvalidName),
        }
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

#[derive(Debug, PartialEq, Eq)]
pub struct Submitted;

impl IntoResponse for Submitted {
    fn into_response(self) -> Response {
        (StatusCode::CREATED, "User added successfully!").into_response()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SubmissionError {
    #[error("Invalid name! Name must be at least 3 characters long.")]
    InvalidName,

    #[error("Invalid email address!")]
    InvalidEmail,

    #[error("Email already exists!")]
    Conflict,

    #[error("Too many requests from this IP, please try again later.")]
    RateLimited { retry_after: Duration },

    #[error("Error saving user data: {0}")]
    Store(#[from] StoreError),
}

impl SubmissionError {
    pub fn reason(&self) -> &'static str {
        match self {
            SubmissionError::InvalidName => "invalid_name",
            SubmissionError::InvalidEmail => "invalid_email",
            SubmissionError::Conflict => "conflict",
            SubmissionError::RateLimited { .. } => "rate_limited",
            SubmissionError::Store(_) => "store_error",
        }
    }
}

impl IntoResponse for SubmissionError {
    fn into_response(self) -> Response {
        match self {
            SubmissionError::InvalidName | SubmissionError::InvalidEmail => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            SubmissionError::Conflict => (StatusCode::CONFLICT, self.to_string()).into_response(),
            SubmissionError::RateLimited { retry_after } => {
                // Round up so clients never retry inside the window
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(RETRY_AFTER, secs.to_string())],
                    self.to_string(),
                )
                    .into_response()
            }
            SubmissionError::Store(ref e) => {
                tracing::error!(error = %e, "Error saving user data");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_TEXT).into_response()
            }
        }
    }
}

/// Validates a submission, rejects emails that are already stored, and
/// appends the rest.
#[derive(Clone)]
pub struct Submissions {
    store: Arc<dyn QualifierStore>,
}

impl Submissions {
    pub fn new(store: Arc<dyn QualifierStore>) -> Self {
        Submissions { store }
    }

    pub async fn submit(&self, request: SubmissionRequest) -> Result<Submitted, SubmissionError> {
        let qualifier = request.into_qualifier()?;

        if self.store.find_by_email(&qualifier.email).await?.is_some() {
            return Err(SubmissionError::Conflict);
        }

        match self.store.insert(qualifier).await? {
            InsertOutcome::Stored => Ok(Submitted),
            InsertOutcome::AlreadyExists => Err(SubmissionError::Conflict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, QualifierRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(name: &str, email: &str) -> SubmissionRequest {
        SubmissionRequest {
            name: Some(name.into()),
            email: Some(email.into()),
        }
    }

    /// Counts calls and fails every one of them.
    #[derive(Default)]
    struct FailingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QualifierStore for FailingStore {
        async fn find_by_email(&self, _email: &str) -> Result<Option<QualifierRecord>, StoreError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn insert(&self, _record: NewQualifier) -> Result<InsertOutcome, StoreError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(StoreError::Timeout(Duration::from_secs(10)))
        }
    }

    /// Misses every lookup, then reports the write as a duplicate, which is
    /// what a racing insert for the same email looks like.
    struct RacingStore;

    #[async_trait]
    impl QualifierStore for RacingStore {
        async fn find_by_email(&self, _email: &str) -> Result<Option<QualifierRecord>, StoreError> {
            Ok(None)
        }

        async fn insert(&self, _record: NewQualifier) -> Result<InsertOutcome, StoreError> {
            Ok(InsertOutcome::AlreadyExists)
        }
    }

    #[test]
    fn test_request_from_json() {
        let parsed = SubmissionRequest::from_json(br#"{"name":"Alice","email":"a@b.com"}"#);
        assert_eq!(parsed.name.as_deref(), Some("Alice"));
        assert_eq!(parsed.email.as_deref(), Some("a@b.com"));

        let partial = SubmissionRequest::from_json(br#"{"email":"a@b.com","extra":1}"#);
        assert_eq!(partial.name, None);
        assert_eq!(partial.email.as_deref(), Some("a@b.com"));

        // A non-string field is dropped on its own
        let mixed = SubmissionRequest::from_json(br#"{"name":"Alice","email":123}"#);
        assert_eq!(mixed.name.as_deref(), Some("Alice"));
        assert_eq!(mixed.email, None);

        let garbage: [&[u8]; 4] = [b"", b"not json", b"[1,2]", br#"{"name":42}"#];
        for garbage in garbage {
            let parsed = SubmissionRequest::from_json(garbage);
            assert!(parsed.name.is_none() && parsed.email.is_none());
        }
    }

    #[test]
    fn test_request_requires_json_content_type() {
        let body = br#"{"name":"Alice","email":"a@b.com"}"#;
        let headers = |content_type: &'static str| {
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, content_type.parse().unwrap());
            headers
        };

        for content_type in [
            "application/json",
            "application/json; charset=utf-8",
            "Application/JSON",
        ] {
            let parsed = SubmissionRequest::from_request(&headers(content_type), body);
            assert_eq!(parsed.name.as_deref(), Some("Alice"), "{content_type}");
        }

        for content_type in [
            "text/plain",
            "application/x-www-form-urlencoded",
            "multipart/form-data",
        ] {
            let parsed = SubmissionRequest::from_request(&headers(content_type), body);
            assert!(parsed.name.is_none() && parsed.email.is_none(), "{content_type}");
        }

        let parsed = SubmissionRequest::from_request(&HeaderMap::new(), body);
        assert!(parsed.name.is_none() && parsed.email.is_none());
    }

    #[tokio::test]
    async fn test_submit_stores_record() {
        let store = Arc::new(MemoryStore::new());
        let submissions = Submissions::new(store.clone());

        let result = submissions.submit(request("Alice", "a@b.com")).await;
        assert_eq!(result.unwrap(), Submitted);

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].email, "a@b.com");
        assert!(records[0].created_at.is_some());
    }

    #[tokio::test]
    async fn test_submit_twice_conflicts() {
        let store = Arc::new(MemoryStore::new());
        let submissions = Submissions::new(store.clone());

        submissions.submit(request("Alice", "a@b.com")).await.unwrap();
        let second = submissions.submit(request("Alice", "a@b.com")).await;

        assert!(matches!(second, Err(SubmissionError::Conflict)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_runs_before_store() {
        let store = Arc::new(FailingStore::default());
        let submissions = Submissions::new(store.clone());

        let result = submissions.submit(request("Al", "a@b.com")).await;
        assert!(matches!(result, Err(SubmissionError::InvalidName)));

        let result = submissions.submit(request("Alice", "a@b")).await;
        assert!(matches!(result, Err(SubmissionError::InvalidEmail)));

        let result = submissions.submit(SubmissionRequest::default()).await;
        assert!(matches!(result, Err(SubmissionError::InvalidName)));

        assert_eq!(store.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_store_failure() {
        let store = Arc::new(FailingStore::default());
        let submissions = Submissions::new(store.clone());

        let result = submissions.submit(request("Alice", "a@b.com")).await;
        assert!(matches!(
            result,
            Err(SubmissionError::Store(StoreError::Unavailable(_)))
        ));
        // The lookup failed, so no write was attempted
        assert_eq!(store.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_lost_insert_race_conflicts() {
        let submissions = Submissions::new(Arc::new(RacingStore));
        let result = submissions.submit(request("Alice", "a@b.com")).await;
        assert!(matches!(result, Err(SubmissionError::Conflict)));
    }

    #[tokio::test]
    async fn test_error_responses() {
        let cases = [
            (SubmissionError::InvalidName, StatusCode::BAD_REQUEST),
            (SubmissionError::InvalidEmail, StatusCode::BAD_REQUEST),
            (SubmissionError::Conflict, StatusCode::CONFLICT),
            (
                SubmissionError::RateLimited {
                    retry_after: Duration::from_millis(1500),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                SubmissionError::Store(StoreError::Backend {
                    status: 500,
                    message: "secret internals".into(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            let response = error.into_response();
            assert_eq!(response.status(), status);
        }

        let response = SubmissionError::RateLimited {
            retry_after: Duration::from_millis(1500),
        }
        .into_response();
        assert_eq!(response.headers()[RETRY_AFTER], "2");

        let response = SubmissionError::Store(StoreError::Decode("secret internals".into()))
            .into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Internal server error");
    }
}
