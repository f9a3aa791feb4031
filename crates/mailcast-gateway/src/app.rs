use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use mailcast_core::MailcastConfig;
use mailcast_store::SqliteStore;
use tower_http::trace::TraceLayer;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: MailcastConfig,
    pub store: Arc<SqliteStore>,
}

impl AppState {
    pub fn new(config: MailcastConfig, store: Arc<SqliteStore>) -> Self {
        Self { config, store }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/subscribers",
            post(crate::http::subscribers::import_subscribers)
                .get(crate::http::subscribers::list_subscribers),
        )
        .route(
            "/upload",
            post(crate::http::subscribers::upload_csv).layer(DefaultBodyLimit::max(
                crate::http::subscribers::UPLOAD_LIMIT,
            )),
        )
        .route(
            "/jobs",
            post(crate::http::jobs::schedule_job).get(crate::http::jobs::list_jobs),
        )
        .route("/jobs/{id}", get(crate::http::jobs::get_job))
        .route("/jobs/{id}/sends", get(crate::http::jobs::list_sends))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use mailcast_store::DeliveryStore;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router() -> (Router, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let state = Arc::new(AppState::new(MailcastConfig::default(), Arc::clone(&store)));
        (build_router(state), store)
    }

    async fn call(
        router: Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = router.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (router, _) = router();
        let (status, body) = call(router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["mailer"], "log");
    }

    #[tokio::test]
    async fn schedule_requires_subject_and_body() {
        let (router, store) = router();
        let (status, body) = call(
            router,
            "POST",
            "/jobs",
            Some(json!({ "subject": "  ", "body": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn schedule_rejects_bad_timestamp() {
        let (router, _) = router();
        let (status, _) = call(
            router,
            "POST",
            "/jobs",
            Some(json!({ "subject": "s", "body": "b", "scheduled_at": "next tuesday" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn schedule_accepts_rfc3339_and_unix() {
        let (router, store) = router();
        let (status, body) = call(
            router.clone(),
            "POST",
            "/jobs",
            Some(json!({
                "subject": " Launch ",
                "body": "We are live",
                "scheduled_at": "2030-01-01T00:00:00Z",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scheduled_at"], 1_893_456_000i64);
        let job = store.get_job(body["id"].as_str().unwrap()).unwrap();
        assert_eq!(job.subject, "Launch");

        let (status, body) = call(
            router.clone(),
            "POST",
            "/jobs",
            Some(json!({ "subject": "s", "body": "b", "scheduled_at": 1_893_456_000i64 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scheduled_at"], 1_893_456_000i64);

        let (status, body) = call(
            router,
            "POST",
            "/jobs",
            Some(json!({ "subject": "s", "body": "b", "scheduled_at": "1893456000" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scheduled_at"], 1_893_456_000i64);
    }

    #[tokio::test]
    async fn empty_schedule_means_now() {
        let (router, _) = router();
        let before = chrono::Utc::now().timestamp();
        let (status, body) = call(
            router,
            "POST",
            "/jobs",
            Some(json!({ "subject": "s", "body": "b", "scheduled_at": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["scheduled_at"].as_i64().unwrap() >= before);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (router, _) = router();
        let (status, _) = call(router.clone(), "GET", "/jobs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(router, "GET", "/jobs/nope/sends", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn job_listing_and_lookup() {
        let (router, store) = router();
        let job = store.create_job("subject", "body", None).unwrap();

        let (status, body) = call(router.clone(), "GET", "/jobs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobs"].as_array().unwrap().len(), 1);

        let (status, body) =
            call(router.clone(), "GET", &format!("/jobs/{}", job.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["dropped_recipients"], 0);

        let (status, body) =
            call(router, "GET", &format!("/jobs/{}/sends", job.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["sends"].as_array().unwrap().is_empty());
    }

    fn multipart(field: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--BOUNDARY\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"list.csv\"\r\n\
             Content-Type: text/csv\r\n\r\n\
             {content}\r\n\
             --BOUNDARY--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn csv_upload_imports_first_column() {
        let (router, store) = router();
        let req = multipart(
            "file",
            " a@example.com ,Alice\nb@example.com,Bob,extra\n,nobody\na@example.com\n",
        );
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["added"], 2);

        let mut emails: Vec<String> = store
            .list_subscribers()
            .unwrap()
            .into_iter()
            .map(|s| s.email)
            .collect();
        emails.sort();
        assert_eq!(emails, vec!["a@example.com", "b@example.com"]);
    }

    #[tokio::test]
    async fn csv_upload_requires_file_field() {
        let (router, _) = router();
        let resp = router
            .oneshot(multipart("attachment", "a@example.com"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn import_skips_blanks_and_duplicates() {
        let (router, _) = router();
        let (status, body) = call(
            router.clone(),
            "POST",
            "/subscribers",
            Some(json!({ "emails": [" a@example.com ", "", "b@example.com", "a@example.com"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["added"], 2);

        let (_, body) = call(router, "GET", "/subscribers", None).await;
        let emails: Vec<&str> = body["subscribers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["email"].as_str().unwrap())
            .collect();
        assert_eq!(emails.len(), 2);
        assert!(emails.contains(&"a@example.com"));
    }
}
