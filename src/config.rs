use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::api_client::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    // true 时强制走本地 mock 接口，忽略 API_URL
    pub use_mock: bool,
    pub api_url: Option<String>,
    pub detect_latency: Duration,
    pub request_retries: u32,
    pub request_timeout: Duration,
    pub undo_window: Duration,
    pub page_size: usize,
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid value, got '{}'", key, raw)),
        _ => Ok(default),
    }
}

// 只有 "true" (不区分大小写) 算开启，其它取值一律视为关闭
fn flag(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: var_or("PORT", 3000)?,
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "data/db/client_store".to_string()),
            use_mock: env::var("USE_MOCK").map(|v| flag(&v)).unwrap_or(false),
            api_url: env::var("API_URL").ok().filter(|url| !url.trim().is_empty()),
            detect_latency: Duration::from_millis(var_or("DETECT_LATENCY_MS", 1500)?),
            request_retries: var_or("REQUEST_RETRIES", 3)?,
            request_timeout: Duration::from_millis(var_or("REQUEST_TIMEOUT_MS", 10_000)?),
            undo_window: Duration::from_millis(var_or("UNDO_WINDOW_MS", 5_000)?),
            page_size: var_or("HISTORY_PAGE_SIZE", 10)?,
        })
    }

    /// 检测接口地址：mock 模式或没配 API_URL 时走本地 `/api/detect`。
    pub fn detect_url(&self) -> String {
        match (&self.api_url, self.use_mock) {
            (Some(url), false) => url.clone(),
            _ => {
                // 0.0.0.0 只能用来监听，不能用来连接
                let host = if self.host == "0.0.0.0" { "127.0.0.1" } else { self.host.as_str() };
                format!("http://{}:{}/api/detect", host, self.port)
            }
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.request_retries,
            timeout: self.request_timeout,
            ..RetryPolicy::default()
        }
    }
}
