use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "authenticity-checker")]
#[command(about = "Check whether content was AI-generated", long_about = None)]
pub struct Cli {
    /// Client storage directory (overrides DB_PATH)
    #[arg(long, global = true)]
    pub storage: Option<PathBuf>,

    /// Keep client state in memory only
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the detection service (POST /api/detect)
    Serve,
    /// Analyze a text snippet or one or more files
    Analyze {
        /// Text to analyze (at least 50 characters)
        #[arg(long, conflicts_with = "files")]
        text: Option<String>,
        /// Files to analyze; only the first is sent
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },
    /// Show the most recent analysis result
    Result,
    /// Browse, search, delete and export analysis history
    History,
    /// Log in (mock)
    Login {
        username: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an account (mock)
    Register {
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Log out
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Request a password reset link (mock)
    ResetPassword { email: String },
}
