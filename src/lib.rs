pub mod analyze;
pub mod api;
pub mod api_client;
pub mod config;
pub mod detection;
pub mod history;
pub mod logging;
pub mod notice;
pub mod session;
pub mod storage;
