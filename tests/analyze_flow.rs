use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use authenticity_checker::analyze::{
    load_last_result, AnalyzeError, Analyzer, FileInput, Submission,
};
use authenticity_checker::api::{self, AppState};
use authenticity_checker::api_client::{ApiClient, RetryPolicy};
use authenticity_checker::detection::{mock_result, DetectRequest, DetectionResult, Detector};
use authenticity_checker::history::{ContentType, HistoryItem, HistoryStore};
use authenticity_checker::storage::{MemoryStorage, SledStorage, Storage, HISTORY_KEY};
use tempfile::TempDir;
use tokio::net::TcpListener;

struct AlwaysAi;

impl Detector for AlwaysAi {
    fn detect(&self, _request: &DetectRequest) -> DetectionResult {
        mock_result(true, 95.5)
    }
}

async fn spawn_service() -> SocketAddr {
    let app = api::app(Arc::new(AppState {
        detector: Arc::new(AlwaysAi),
        latency: Duration::ZERO,
    }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn analyzer(addr: SocketAddr) -> Analyzer {
    Analyzer::new(
        ApiClient::new().unwrap(),
        format!("http://{}/api/detect", addr),
        RetryPolicy {
            retries: 2,
            timeout: Duration::from_secs(5),
            backoff_unit: Duration::from_millis(5),
        },
    )
}

fn persisted(storage: &dyn Storage) -> Vec<HistoryItem> {
    let raw = storage.get(HISTORY_KEY).unwrap().unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn test_text_submission_is_stored_and_prepended() {
    let addr = spawn_service().await;
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let mut history = HistoryStore::load(storage.clone());
    let analyzer = analyzer(addr);

    let text = "This paragraph is long enough to pass the fifty character minimum.";
    let first = analyzer
        .analyze(&Submission::Text(text.to_string()), &storage, &mut history)
        .await
        .unwrap();
    let second = analyzer
        .analyze(&Submission::Text(text.to_string()), &storage, &mut history)
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(second.kind, ContentType::Text);
    assert_eq!(second.preview, format!("{}...", &text[..50]));
    assert_eq!(load_last_result(storage.as_ref()), Some(mock_result(true, 95.5)));

    // 最新的在前
    let ids: Vec<String> = persisted(storage.as_ref()).into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);
    assert_eq!(history.items()[0].id, second.id);
}

#[tokio::test]
async fn test_file_submission_records_image_type() {
    let addr = spawn_service().await;
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let mut history = HistoryStore::load(storage.clone());

    let item = analyzer(addr)
        .analyze(
            &Submission::Files(vec![FileInput::new("portrait.jpg", "image/jpeg")]),
            &storage,
            &mut history,
        )
        .await
        .unwrap();

    assert_eq!(item.kind, ContentType::Image);
    assert_eq!(item.preview, "1 file(s): portrait.jpg...");
}

#[tokio::test]
async fn test_unreachable_service_surfaces_error_and_keeps_history() {
    // 先占一个端口再释放，保证没有服务在监听
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let mut history = HistoryStore::load(storage.clone());

    let err = analyzer(addr)
        .analyze(&Submission::Text("z".repeat(80)), &storage, &mut history)
        .await
        .unwrap_err();

    assert!(matches!(err, AnalyzeError::Request(_)));
    assert!(err.to_string().starts_with("Analysis failed:"));
    assert!(history.is_empty());
    assert!(load_last_result(storage.as_ref()).is_none());
}

#[tokio::test]
async fn test_history_survives_restart_with_sled() {
    let addr = spawn_service().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("client_store");

    let id = {
        let storage: Arc<dyn Storage> = Arc::new(SledStorage::open(&path).unwrap());
        let mut history = HistoryStore::load(storage.clone());
        let item = analyzer(addr)
            .analyze(&Submission::Text("q".repeat(64)), &storage, &mut history)
            .await
            .unwrap();
        storage.flush().unwrap();
        item.id
    };

    let storage: Arc<dyn Storage> = Arc::new(SledStorage::open(&path).unwrap());
    let history = HistoryStore::load(storage.clone());
    assert_eq!(history.len(), 1);
    assert_eq!(history.items()[0].id, id);
    assert!(load_last_result(storage.as_ref()).is_some());
}
