mod commands;
mod console;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use authenticity_checker::analyze::{self, Analyzer, FileInput, Submission};
use authenticity_checker::api::{self, AppState};
use authenticity_checker::api_client::ApiClient;
use authenticity_checker::config::Config;
use authenticity_checker::detection::MockDetector;
use authenticity_checker::history::HistoryStore;
use authenticity_checker::logging;
use authenticity_checker::notice::Notice;
use authenticity_checker::session::SessionStore;
use authenticity_checker::storage::{MemoryStorage, SledStorage, Storage};
use clap::{CommandFactory, Parser};
use commands::{Cli, Commands};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _guard = logging::init_logger();

    // ----------------------------------------------------------------
    // 0. 加载配置
    // ----------------------------------------------------------------
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let Some(command) = cli.command else {
        Cli::command().print_long_help()?;
        return Ok(());
    };

    if let Commands::Serve = command {
        return serve(&config).await;
    }

    // ----------------------------------------------------------------
    // 1. 客户端存储 (相当于浏览器 localStorage)
    // ----------------------------------------------------------------
    let storage: Arc<dyn Storage> = if cli.ephemeral {
        Arc::new(MemoryStorage::new())
    } else {
        let path = cli.storage.unwrap_or_else(|| config.db_path.clone().into());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        Arc::new(SledStorage::open(&path)?)
    };

    let outcome = run_client(command, &config, storage.clone()).await;
    storage.flush()?;
    outcome
}

/// 启动检测服务
async fn serve(config: &Config) -> anyhow::Result<()> {
    info!("🛡️ Authenticity Checker detection service starting...");

    let state = Arc::new(AppState {
        detector: Arc::new(MockDetector),
        latency: config.detect_latency,
    });
    let app = api::app(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!("🚀 API listening on http://{}", addr);
    info!("   - POST /api/detect : mock authenticity detection");
    info!("   - GET  /health     : liveness");

    axum::serve(listener, app).await?;
    Ok(())
}

fn print_notices(notices: Vec<Notice>) {
    for notice in notices {
        println!("{}", notice);
    }
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

async fn run_client(
    command: Commands,
    config: &Config,
    storage: Arc<dyn Storage>,
) -> anyhow::Result<()> {
    match command {
        Commands::Serve => serve(config).await?,
        Commands::Analyze { text, files } => {
            let submission = match text {
                Some(text) => Submission::Text(text),
                None => Submission::Files(
                    files
                        .iter()
                        .map(|path| {
                            let name = path
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_else(|| path.display().to_string());
                            FileInput::new(name, guess_mime(path))
                        })
                        .collect(),
                ),
            };

            let mut history = HistoryStore::load(storage.clone())
                .with_page_size(config.page_size)
                .with_undo_window(config.undo_window);
            let analyzer =
                Analyzer::new(ApiClient::new()?, config.detect_url(), config.retry_policy());
            info!("Submitting to {}", analyzer.endpoint());

            match analyzer.analyze(&submission, &storage, &mut history).await {
                Ok(item) => {
                    println!("✅ Analysis complete!");
                    print_result(&item.result);
                    println!("Saved to history as {}", item.id);
                }
                Err(e) => println!("❌ {}", e),
            }
            print_notices(history.take_notices());
        }
        Commands::Result => match analyze::load_last_result(storage.as_ref()) {
            Some(result) => print_result(&result),
            None => println!("No result found. Analyze some content first."),
        },
        Commands::History => {
            let history = HistoryStore::load(storage)
                .with_page_size(config.page_size)
                .with_undo_window(config.undo_window);
            console::run(history).await?;
        }
        Commands::Login { username, email } => {
            let mut session = SessionStore::init(storage);
            session.login(&username, email.as_deref())?;
            print_notices(session.take_notices());
            session.teardown()?;
        }
        Commands::Register { username, email, password } => {
            let mut session = SessionStore::init(storage);
            session.register(&username, &email, &password).await?;
            print_notices(session.take_notices());
            session.teardown()?;
        }
        Commands::Logout => {
            let mut session = SessionStore::init(storage);
            session.logout()?;
            print_notices(session.take_notices());
            session.teardown()?;
        }
        Commands::Whoami => {
            let session = SessionStore::init(storage);
            match session.current_user() {
                Some(user) => println!("{} <{}> ({:?})", user.username, user.email, user.role),
                None => println!("Not logged in"),
            }
            session.teardown()?;
        }
        Commands::ResetPassword { email } => {
            let mut session = SessionStore::init(storage);
            session.reset_password(&email).await;
            print_notices(session.take_notices());
            session.teardown()?;
        }
    }
    Ok(())
}

fn print_result(result: &authenticity_checker::detection::DetectionResult) {
    println!("Result:      {}", result.label.as_str());
    println!("Confidence:  {:.1}%", result.confidence);
    if let Some(hint) = &result.model_hint {
        println!("Model hint:  {}", hint);
    }
    println!("Explanation: {}", result.explanation);
    let details = &result.analysis_details;
    for (name, signals) in [
        ("text", &details.text_signals),
        ("image", &details.image_signals),
        ("video", &details.video_signals),
    ] {
        if !signals.is_empty() {
            println!("{} signals: {}", name, signals.join(", "));
        }
    }
}
