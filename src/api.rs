use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::detection::{DetectRequest, DetectionResult, Detector};

// ==========================================
// 1. 应用状态 (Shared State)
// ==========================================
// 所有请求共享同一个检测器，服务端不保存任何历史。
pub struct AppState {
    pub detector: Arc<dyn Detector>,
    // 模拟检测耗时
    pub latency: Duration,
}

// ==========================================
// 2. 数据传输对象 (DTOs)
// ==========================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(ErrorBody { error: message.to_string() }))
}

// ==========================================
// 3. API 路由构建
// ==========================================
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/detect", post(detect))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ==========================================
// 4. 处理函数 (Handlers)
// ==========================================

/// 接口：内容真伪检测
///
/// 请求体直接按 JSON 解析，不要求 `content-type` 头。
async fn detect(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<DetectionResult>, ApiError> {
    // 请求体无法解析按内部错误处理
    let req: DetectRequest = serde_json::from_slice(&body).map_err(|e| {
        error!("Error in detect route: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    })?;

    if !req.is_complete() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Missing required fields: type and content",
        ));
    }

    let kind = match req.submission_kind() {
        Some(kind) => kind.as_str(),
        None => "other",
    };
    info!(
        "📥 detect request: type={} ({:?}), file={:?}, {} bytes",
        kind,
        req.kind.as_deref().unwrap_or_default(),
        req.file_name,
        req.content.as_deref().map_or(0, str::len)
    );

    if !state.latency.is_zero() {
        tokio::time::sleep(state.latency).await;
    }

    let result = state.detector.detect(&req);
    info!("✅ verdict={} confidence={:.1}", result.label.as_str(), result.confidence);
    Ok(Json(result))
}

async fn health() -> &'static str {
    "ok"
}
