use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use authenticity_checker::history::{self, HistoryItem, HistoryStore, UndoOutcome};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error};

/// 历史控制台的一条指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Page(usize),
    Next,
    Prev,
    Delete(String),
    Undo,
    Clear,
    Search(String),
    Export(PathBuf),
    Stats,
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  list              show the current page
  page N | next | prev
  delete ID         delete an item (undo within the grace window)
  undo              restore the last deleted item
  clear             delete all history (asks for confirmation)
  search QUERY      filter by preview, type or result
  export PATH       write the history as CSV (a directory gets a dated file name)
  stats             summary counts
  quit";

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let need_arg = |name: &str| -> Result<String, String> {
        if rest.is_empty() {
            Err(format!("'{}' needs an argument", name))
        } else {
            Ok(rest.to_string())
        }
    };

    match head.to_lowercase().as_str() {
        "" | "list" | "ls" => Ok(ConsoleCommand::List),
        "page" => need_arg("page")?
            .parse()
            .map(ConsoleCommand::Page)
            .map_err(|_| format!("not a page number: {}", rest)),
        "next" | "n" => Ok(ConsoleCommand::Next),
        "prev" | "p" => Ok(ConsoleCommand::Prev),
        "delete" | "rm" => need_arg("delete").map(ConsoleCommand::Delete),
        "undo" | "u" => Ok(ConsoleCommand::Undo),
        "clear" => Ok(ConsoleCommand::Clear),
        "search" | "find" => Ok(ConsoleCommand::Search(rest.to_string())),
        "export" => need_arg("export").map(|p| ConsoleCommand::Export(PathBuf::from(p))),
        "stats" => Ok(ConsoleCommand::Stats),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" | "q" => Ok(ConsoleCommand::Quit),
        other => Err(format!("unknown command: {} (try 'help')", other)),
    }
}

fn format_date(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}

fn print_rows<'a>(items: impl IntoIterator<Item = &'a HistoryItem>) {
    let mut empty = true;
    println!("{:<40} {:<6} {:<6} {:>6}  {:<10} PREVIEW", "ID", "TYPE", "RESULT", "CONF", "DATE");
    for item in items {
        empty = false;
        println!(
            "{:<40} {:<6} {:<6} {:>5.1}%  {:<10} {}",
            item.id,
            item.kind.as_str(),
            item.result.label.as_str(),
            item.result.confidence,
            format_date(item.timestamp),
            truncate(&item.preview, 40)
        );
    }
    if empty {
        println!("No results found");
    }
}

fn print_page(store: &HistoryStore) {
    if store.is_empty() {
        println!("No analysis history found.");
        return;
    }
    print_rows(store.current_items());
    println!("Page {} of {}", store.current_page(), store.total_pages());
}

fn print_notices(store: &mut HistoryStore) {
    for notice in store.take_notices() {
        println!("{}", notice);
    }
}

fn export_path(target: PathBuf) -> PathBuf {
    if target.is_dir() {
        target.join(history::export_file_name(Utc::now()))
    } else {
        target
    }
}

/// 导出到文件，返回实际写入的路径。失败只反馈给用户，不结束控制台。
fn export_to(items: &[HistoryItem], target: PathBuf) -> anyhow::Result<PathBuf> {
    let csv = history::export_csv(items)?;
    let path = export_path(target);
    std::fs::write(&path, csv).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn prompt(text: &str) {
    print!("{}", text);
    if let Err(e) = std::io::stdout().flush() {
        debug!("stdout flush failed: {}", e);
    }
}

/// 交互式历史控制台。删除后的撤销宽限期只在本进程内有效。
pub async fn run(mut store: HistoryStore) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_notices(&mut store);
    print_page(&store);
    println!("type 'help' for commands");

    loop {
        prompt("history> ");

        let Some(line) = lines.next_line().await? else { break };
        if store.expire_pending() {
            debug!("undo window elapsed");
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };

        match command {
            ConsoleCommand::List => print_page(&store),
            ConsoleCommand::Page(page) => {
                store.set_page(page);
                print_page(&store);
            }
            ConsoleCommand::Next => {
                store.next_page();
                print_page(&store);
            }
            ConsoleCommand::Prev => {
                store.prev_page();
                print_page(&store);
            }
            ConsoleCommand::Delete(id) => match store.delete(&id) {
                Some(handle) => {
                    print_notices(&mut store);
                    println!("type 'undo' to restore {}", handle.id);
                }
                None => println!("no history item with id {}", id),
            },
            ConsoleCommand::Undo => {
                let outcome = match store.pending_undo() {
                    Some(handle) => store.undo(&handle),
                    None => UndoOutcome::NotPending,
                };
                match outcome {
                    UndoOutcome::Restored | UndoOutcome::AlreadyPresent => {
                        print_notices(&mut store)
                    }
                    UndoOutcome::Expired | UndoOutcome::NotPending => println!("nothing to undo"),
                }
            }
            ConsoleCommand::Clear => {
                if store.is_empty() {
                    println!("No analysis history found.");
                    continue;
                }
                prompt(
                    "Are you sure you want to clear all analysis history? \
                     This action cannot be undone. [y/N] ",
                );
                let answer = lines.next_line().await?.unwrap_or_default();
                if answer.trim().eq_ignore_ascii_case("y") {
                    store.clear();
                    print_notices(&mut store);
                }
            }
            ConsoleCommand::Search(query) => print_rows(store.search(&query)),
            ConsoleCommand::Export(target) => match export_to(store.items(), target) {
                Ok(path) => println!("✅ History exported to {}", path.display()),
                Err(e) => {
                    error!("Export failed: {:#}", e);
                    println!("❌ Failed to export history: {:#}", e);
                }
            },
            ConsoleCommand::Stats => {
                let stats = store.stats();
                println!("Total scans:    {}", stats.total);
                println!("AI detected:    {}", stats.ai);
                println!("Human verified: {}", stats.real);
                if let Some(avg) = stats.average_confidence {
                    println!("Avg confidence: {:.1}%", avg);
                }
            }
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => break,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use authenticity_checker::detection::mock_result;
    use authenticity_checker::history::ContentType;
    use tempfile::TempDir;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command(""), Ok(ConsoleCommand::List));
        assert_eq!(parse_command("page 3"), Ok(ConsoleCommand::Page(3)));
        assert_eq!(parse_command("  delete  abc-1 "), Ok(ConsoleCommand::Delete("abc-1".into())));
        assert_eq!(
            parse_command("search fake news"),
            Ok(ConsoleCommand::Search("fake news".into()))
        );
        assert_eq!(parse_command("search"), Ok(ConsoleCommand::Search(String::new())));
        assert_eq!(parse_command("EXPORT out.csv"), Ok(ConsoleCommand::Export("out.csv".into())));
        assert_eq!(parse_command("q"), Ok(ConsoleCommand::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("page two").is_err());
        assert!(parse_command("delete").is_err());
        assert!(parse_command("frobnicate").is_err());
    }

    fn sample(id: &str) -> HistoryItem {
        HistoryItem {
            result: mock_result(true, 88.0),
            id: id.to_string(),
            timestamp: 1_760_000_000_000,
            kind: ContentType::Text,
            preview: "sample...".to_string(),
        }
    }

    #[test]
    fn test_export_into_directory_uses_dated_name() {
        let dir = TempDir::new().unwrap();
        let path = export_to(&[sample("a-1")], dir.path().to_path_buf()).unwrap();

        assert_eq!(path.parent(), Some(dir.path()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("authenticity_history_") && name.ends_with(".csv"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("ID,Type,Result,Confidence,Date,Preview"));
    }

    #[test]
    fn test_export_to_missing_directory_is_an_error_not_a_crash() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("missing").join("out.csv");

        let err = export_to(&[sample("a-1")], target.clone()).unwrap_err();
        assert!(format!("{:#}", err).contains("writing"));
        assert!(!target.exists());
    }

    #[test]
    fn test_export_with_no_items_reports_it() {
        let dir = TempDir::new().unwrap();
        let err = export_to(&[], dir.path().join("out.csv")).unwrap_err();
        assert_eq!(err.to_string(), "No items to export");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
