//! Broker mode end-to-end over the SQLite broker
//!
//! Facades submit through `BrokerBackend`, workers claim from the shared
//! database file, completion events come back through `job_events`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fakturace_core::application::retry::RetryPolicy;
use fakturace_core::application::{BackendStrategy, BrokerBackend, NotificationJobs, OcrJobs, PdfJobs};
use fakturace_core::domain::{
    InvoiceDocument, JobError, JobState, NotificationLevel, NotificationPayload, NotificationType,
    OcrJobData, OcrResult,
};
use fakturace_core::port::collaborators::mocks::{MockFileStore, MockOcrEngine, MockRenderer};
use fakturace_core::port::id_provider::UuidProvider;
use fakturace_core::port::time_provider::SystemTimeProvider;
use fakturace_infra_sqlite::{connect_broker, create_pool, run_migrations, SqliteNotificationStore};
use serde_json::json;

const POLL: Duration = Duration::from_millis(10);

fn temp_db() -> (String, PathBuf) {
    let path = std::env::temp_dir().join(format!("fakturace-e2e-{}.db", uuid::Uuid::new_v4()));
    (format!("sqlite://{}", path.display()), path)
}

async fn backend(url: &str) -> Arc<dyn BackendStrategy> {
    let broker = connect_broker(url, POLL).await.unwrap();
    Arc::new(
        BrokerBackend::new(
            Arc::new(broker),
            Arc::new(UuidProvider),
            Arc::new(SystemTimeProvider),
        )
        .with_poll_interval(POLL),
    )
}

fn document(number: &str) -> InvoiceDocument {
    serde_json::from_value(json!({
        "invoice": {
            "id": 1,
            "invoiceNumber": number,
            "organizationId": 3,
            "month": 5,
            "year": 2024,
            "issueDate": "2024-05-31",
            "dueDate": "2024-06-14"
        },
        "organization": {"id": 3, "name": "Acme s.r.o."},
        "workRecords": [
            {"id": 1, "date": "2024-05-02", "minutes": 90, "kilometers": 12}
        ]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_pdf_submit_completes_through_worker() {
    let (url, path) = temp_db();
    let backend = backend(&url).await;
    let renderer = Arc::new(MockRenderer::new("file://artifacts"));
    let pdf = PdfJobs::new(backend.clone(), RetryPolicy::single_attempt(), renderer.clone()).unwrap();

    let location = pdf.generate(&document("2024-001")).await.unwrap();
    assert_eq!(location, "file://artifacts/2024-001.pdf");
    assert_eq!(renderer.calls(), 1);

    // Completed records are removed
    let stats = pdf.stats().await.unwrap();
    assert!(stats.enabled);
    assert_eq!(stats.count(JobState::Completed), 0);
    assert_eq!(stats.count(JobState::Queued), 0);

    backend.shutdown(Duration::from_millis(500)).await.unwrap();
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn test_ocr_failure_is_retained_with_attempt_count() {
    let (url, path) = temp_db();
    let backend = backend(&url).await;
    let files = Arc::new(MockFileStore::new());
    let ocr = OcrJobs::new(
        backend.clone(),
        RetryPolicy::new(3, Duration::from_millis(20)),
        files.clone(),
        Arc::new(MockOcrEngine::returning(OcrResult::default())),
    )
    .unwrap();

    let err = ocr.process(&OcrJobData::new("uploads/missing.pdf")).await.unwrap_err();
    assert_eq!(err.attempts(), Some(3));
    assert_eq!(
        err.to_string(),
        "OCR job failed: source file for OCR not found (after 3 attempts)"
    );
    assert!(matches!(err, JobError::Terminal { .. }));
    assert_eq!(files.reads(), 3);

    let stats = ocr.stats().await.unwrap();
    assert_eq!(stats.count(JobState::Failed), 1);

    backend.shutdown(Duration::from_millis(500)).await.unwrap();
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn test_two_processes_share_one_queue() {
    let (url, path) = temp_db();
    let first = backend(&url).await;
    let second = backend(&url).await;

    let renderer_a = Arc::new(MockRenderer::new("file://a"));
    let renderer_b = Arc::new(MockRenderer::new("file://b"));
    let pdf_a = PdfJobs::new(first.clone(), RetryPolicy::single_attempt(), renderer_a.clone()).unwrap();
    let _pdf_b = PdfJobs::new(second.clone(), RetryPolicy::single_attempt(), renderer_b.clone()).unwrap();

    let documents: Vec<_> = (0..6).map(|i| document(&format!("2024-{i:03}"))).collect();
    let results = futures::future::join_all(documents.iter().map(|d| pdf_a.generate(d))).await;

    for (i, result) in results.into_iter().enumerate() {
        let location = result.unwrap();
        assert!(location.ends_with(&format!("2024-{i:03}.pdf")), "{location}");
    }
    // Each job ran exactly once, on whichever process claimed it
    assert_eq!(renderer_a.calls() + renderer_b.calls(), 6);

    first.shutdown(Duration::from_millis(500)).await.unwrap();
    second.shutdown(Duration::from_millis(500)).await.unwrap();
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn test_notification_dispatch_is_fire_and_forget() {
    let (url, path) = temp_db();
    let backend = backend(&url).await;
    let pool = create_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let store = Arc::new(SqliteNotificationStore::new(pool.clone(), Arc::new(SystemTimeProvider)));
    let notifications =
        NotificationJobs::new(backend.clone(), NotificationJobs::default_policy(), store).unwrap();

    let payload = NotificationPayload::new(
        NotificationType::OcrFailure,
        NotificationLevel::Error,
        "Scan faktura.pdf could not be read",
    );
    let job_id = notifications.dispatch(&payload).await.unwrap();
    assert!(job_id.is_some());

    let mut stored = 0i64;
    for _ in 0..200 {
        stored = sqlx::query_scalar("SELECT COUNT(*) FROM notifications")
            .fetch_one(&pool)
            .await
            .unwrap();
        if stored > 0 {
            break;
        }
        tokio::time::sleep(POLL).await;
    }
    assert_eq!(stored, 1);

    backend.shutdown(Duration::from_millis(500)).await.unwrap();
    pool.close().await;
    let _ = std::fs::remove_file(path);
}
