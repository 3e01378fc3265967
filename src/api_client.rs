use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP error! status: {0}")]
    Status(u16),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

// ==========================================
// 1. 重试策略 (Retry Policy)
// ==========================================

/// 指数退避重试。
///
/// 每次尝试都套一层超时；超时后该次请求的 future 被直接丢弃 (即取消)，不影响外层循环。
/// 第 n 次尝试失败后等待 `2^n × backoff_unit` 再重试，用完 `retries` 次尝试后返回最后一个错误。
///
/// 非 2xx 状态码和网络错误一样会重试，不区分临时失败与永久失败。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub timeout: Duration,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次 (从 1 开始) 尝试失败后的等待时长。
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// 按策略驱动一个异步操作。`op` 收到当前尝试序号 (从 1 开始)。
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        // retries = 0 也至少发一次
        let max_attempts = self.retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout(self.timeout)),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            warn!("Attempt {} failed: {}", attempt, err);
            if attempt >= max_attempts {
                return Err(err);
            }

            let delay = self.backoff_delay(attempt);
            debug!("Backing off for {:?} before attempt {}", delay, attempt + 1);
            tokio::time::sleep(delay).await;
        }
    }
}

// ==========================================
// 2. 请求参数
// ==========================================

/// 单次逻辑请求的参数：重试策略 + 透传给 HTTP 的 method / headers / body。
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub policy: RetryPolicy,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

impl RequestOptions {
    /// POST 一个 JSON 请求体。
    pub fn post_json<B: Serialize>(body: &B) -> Result<Self, ClientError> {
        let body = serde_json::to_string(body)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self {
            method: Method::POST,
            headers,
            body: Some(body),
            ..Default::default()
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

// ==========================================
// 3. API 客户端
// ==========================================

pub struct ApiClient {
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new() -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("authenticity-checker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// 发起一次带重试的请求，并把 2xx 响应体解析为 `T`。
    pub async fn call<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<T, ClientError> {
        let url = Url::parse(url)
            .map_err(|e| ClientError::InvalidRequest(format!("bad url '{}': {}", url, e)))?;

        let result = options
            .policy
            .run(|attempt| {
                let mut request = self
                    .client
                    .request(options.method.clone(), url.clone())
                    .headers(options.headers.clone());
                if let Some(body) = &options.body {
                    request = request.body(body.clone());
                }
                let url = url.clone();

                async move {
                    debug!("{} {} (attempt {})", options.method, url, attempt);
                    let response = request.send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(ClientError::Status(status.as_u16()));
                    }
                    response
                        .json::<T>()
                        .await
                        .map_err(|e| ClientError::Decode(e.to_string()))
                }
            })
            .await;

        if result.is_ok() {
            info!("{} {} succeeded", options.method, url);
        }
        result
    }
}
