use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info};

use crate::api_client::{ApiClient, ClientError, RequestOptions, RetryPolicy};
use crate::detection::{DetectRequest, DetectionResult};
use crate::history::{generate_id, ContentType, HistoryError, HistoryItem, HistoryStore};
use crate::storage::{Storage, LAST_RESULT_KEY};

pub const MIN_TEXT_LENGTH: usize = 50;
const PREVIEW_CHARS: usize = 50;
// 文件内容暂不上传，只发占位串
const FILE_CONTENT_PLACEHOLDER: &str = "file_content_placeholder";

/// 待上传文件的描述 (只需要文件名和 MIME 类型)。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInput {
    pub name: String,
    pub mime: String,
}

impl FileInput {
    pub fn new(name: impl Into<String>, mime: impl Into<String>) -> Self {
        Self { name: name.into(), mime: mime.into() }
    }
}

/// 一次分析提交
#[derive(Debug, Clone)]
pub enum Submission {
    Text(String),
    Files(Vec<FileInput>),
}

#[derive(Debug, Error)]
pub enum AnalyzeError {
    /// 输入不合法，不会发起网络请求
    #[error("{0}")]
    Validation(&'static str),

    #[error("Analysis failed: {0}")]
    Request(#[from] ClientError),

    #[error("Analysis failed: {0}")]
    History(#[from] HistoryError),
}

impl Submission {
    /// 提交前的本地校验
    pub fn validate(&self) -> Result<(), AnalyzeError> {
        match self {
            Submission::Text(text) if text.chars().count() < MIN_TEXT_LENGTH => {
                Err(AnalyzeError::Validation("Text must be at least 50 characters"))
            }
            Submission::Files(files) if files.is_empty() => {
                Err(AnalyzeError::Validation("Please select at least one file"))
            }
            _ => Ok(()),
        }
    }

    /// 只分析文本或第一个文件
    fn request(&self) -> DetectRequest {
        match self {
            Submission::Text(text) => DetectRequest::text(text.clone()),
            Submission::Files(files) => DetectRequest::file(
                FILE_CONTENT_PLACEHOLDER,
                files.first().map(|f| f.name.clone()).unwrap_or_default(),
            ),
        }
    }

    fn content_type(&self) -> ContentType {
        match self {
            Submission::Text(_) => ContentType::Text,
            Submission::Files(files) => {
                if files.first().is_some_and(|f| f.mime.starts_with("image")) {
                    ContentType::Image
                } else {
                    ContentType::Video
                }
            }
        }
    }

    fn preview(&self) -> String {
        match self {
            Submission::Text(text) => {
                let head: String = text.chars().take(PREVIEW_CHARS).collect();
                format!("{}...", head)
            }
            Submission::Files(files) => format!(
                "{} file(s): {}...",
                files.len(),
                files.first().map(|f| f.name.as_str()).unwrap_or_default()
            ),
        }
    }
}

/// 分析流程：校验 → 调用检测接口 → 写 `lastResult` → 写入历史。
pub struct Analyzer {
    client: ApiClient,
    endpoint: String,
    policy: RetryPolicy,
}

impl Analyzer {
    pub fn new(client: ApiClient, endpoint: impl Into<String>, policy: RetryPolicy) -> Self {
        Self { client, endpoint: endpoint.into(), policy }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn analyze(
        &self,
        submission: &Submission,
        storage: &Arc<dyn Storage>,
        history: &mut HistoryStore,
    ) -> Result<HistoryItem, AnalyzeError> {
        submission.validate()?;

        let options =
            RequestOptions::post_json(&submission.request())?.with_policy(self.policy.clone());
        let result: DetectionResult = self
            .client
            .call(&self.endpoint, &options)
            .await
            .inspect_err(|e| error!("Analysis failed: {}", e))?;

        // 存储失败不影响本次结果
        save_last_result(storage.as_ref(), &result);

        let item = HistoryItem {
            result,
            id: generate_id(),
            timestamp: Utc::now().timestamp_millis(),
            kind: submission.content_type(),
            preview: submission.preview(),
        };
        history.add(item.clone())?;
        info!("Analysis complete: {} ({})", item.id, item.result.label.as_str());
        Ok(item)
    }
}

pub fn save_last_result(storage: &dyn Storage, result: &DetectionResult) -> bool {
    let outcome = serde_json::to_string(result)
        .map_err(|e| e.to_string())
        .and_then(|raw| storage.set(LAST_RESULT_KEY, &raw).map_err(|e| e.to_string()));
    match outcome {
        Ok(()) => true,
        Err(e) => {
            error!("Error saving last result: {}", e);
            false
        }
    }
}

/// 读取最近一次结果；不存在或损坏时返回 None。
pub fn load_last_result(storage: &dyn Storage) -> Option<DetectionResult> {
    let raw = storage.get(LAST_RESULT_KEY).ok().flatten()?;
    serde_json::from_str(&raw)
        .inspect_err(|e| error!("Stored last result is unreadable: {}", e))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::mock_result;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_text_shorter_than_minimum_is_rejected() {
        let short = Submission::Text("x".repeat(49));
        let err = short.validate().unwrap_err();
        assert_eq!(err.to_string(), "Text must be at least 50 characters");
        assert!(Submission::Text("x".repeat(50)).validate().is_ok());
    }

    #[test]
    fn test_empty_file_list_is_rejected() {
        let err = Submission::Files(Vec::new()).validate().unwrap_err();
        assert_eq!(err.to_string(), "Please select at least one file");
    }

    #[test]
    fn test_text_preview_truncates_on_chars() {
        let text = "é".repeat(60);
        let preview = Submission::Text(text).preview();
        assert_eq!(preview.chars().count(), 53);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_file_submission_shape() {
        let files = Submission::Files(vec![
            FileInput::new("cat.png", "image/png"),
            FileInput::new("clip.mp4", "video/mp4"),
        ]);
        assert_eq!(files.content_type(), ContentType::Image);
        assert_eq!(files.preview(), "2 file(s): cat.png...");

        let request = files.request();
        assert_eq!(request.file_name.as_deref(), Some("cat.png"));
        assert_eq!(request.content.as_deref(), Some(FILE_CONTENT_PLACEHOLDER));

        let video = Submission::Files(vec![FileInput::new("clip.mp4", "video/mp4")]);
        assert_eq!(video.content_type(), ContentType::Video);
    }

    #[tokio::test]
    async fn test_validation_error_skips_network() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut history = HistoryStore::load(storage.clone());
        // 端口 9 上没有服务；若真的发请求会得到网络错误而不是校验错误
        let analyzer = Analyzer::new(
            ApiClient::new().unwrap(),
            "http://127.0.0.1:9/api/detect",
            RetryPolicy::default(),
        );

        let err = analyzer
            .analyze(&Submission::Text("too short".into()), &storage, &mut history)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::Validation(_)));
        assert!(history.is_empty());
        assert!(load_last_result(storage.as_ref()).is_none());
    }

    #[test]
    fn test_last_result_roundtrip_and_corruption() {
        let storage = MemoryStorage::new();
        assert!(load_last_result(&storage).is_none());

        let result = mock_result(false, 77.7);
        assert!(save_last_result(&storage, &result));
        assert_eq!(load_last_result(&storage), Some(result));

        storage.set(LAST_RESULT_KEY, "nope").unwrap();
        assert!(load_last_result(&storage).is_none());
    }

    #[test]
    fn test_last_result_write_failure_is_soft() {
        let storage = MemoryStorage::new();
        storage.set_fail_writes(true);
        assert!(!save_last_result(&storage, &mock_result(true, 90.0)));
    }
}
