//! bookchat-cli: terminal chat client for the Bookchat server
//!
//! Keeps a local session history under `--data-dir` and streams answers from
//! the server as they arrive.
//!
//! # Subcommands
//! - `chat [--session <id>] [--book <id>]`: interactive chat
//! - `sessions`: list stored sessions
//! - `show <id>`: print a stored session
//! - `delete <id>`: delete a stored session
//! - `status`: show server health

mod controller;
mod transport;

use std::io::Write;
use std::path::PathBuf;

use bookchat_core::{ChatSession, FileStore, Role, SessionStore};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use controller::{ControllerError, SendOutcome, SessionController};
use transport::HttpTransport;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";
const DEFAULT_DATA_DIR: &str = ".bookchat";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "bookchat-cli", version, about = "Chat with a book through the Bookchat server")]
struct Cli {
    /// Bookchat server URL (overrides BOOKCHAT_SERVER_URL env var)
    #[arg(long, env = "BOOKCHAT_SERVER_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Directory holding the local session history
    #[arg(long, env = "BOOKCHAT_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Ask for complete answers instead of streamed ones
    #[arg(long)]
    no_stream: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start an interactive chat
    Chat {
        /// Resume a stored session
        #[arg(long)]
        session: Option<String>,

        /// Book identifier sent with each request
        #[arg(long)]
        book: Option<String>,
    },

    /// List stored sessions, most recent first
    Sessions,

    /// Print the messages of a stored session
    Show {
        /// Session id
        id: String,
    },

    /// Delete a stored session
    Delete {
        /// Session id
        id: String,
    },

    /// Show Bookchat server status
    Status,
}

type Controller = SessionController<FileStore, HttpTransport>;

// ============================================================================
// Output helpers
// ============================================================================

fn format_time(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M").to_string(),
        None => "?".to_string(),
    }
}

fn print_session_list(sessions: &[ChatSession]) {
    if sessions.is_empty() {
        eprintln!("No stored sessions");
        return;
    }
    for s in sessions {
        println!(
            "{}  {}  {:>3} msgs  {}",
            s.session_id,
            format_time(s.updated_at),
            s.messages.len(),
            s.display_title()
        );
    }
}

fn print_session(session: &ChatSession) {
    println!("# {}", session.display_title());
    println!("{} · created {}\n", session.session_id, format_time(session.created_at));
    for m in &session.messages {
        let who = match m.role {
            Role::User => "you",
            Role::Assistant => "book",
            Role::System => "system",
        };
        println!("{}> {}\n", who, m.content);
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn do_chat(
    server: &str,
    data_dir: PathBuf,
    streaming: bool,
    session: Option<String>,
    book: Option<String>,
) -> anyhow::Result<()> {
    let transport = HttpTransport::new(server)?;
    let store = SessionStore::new(FileStore::new(data_dir));
    let mut chat: Controller = SessionController::new(store, transport, streaming);

    if let Some(id) = session {
        chat.select_session(&id)?;
        print_session(chat.session());
    }
    if book.is_some() {
        chat.set_book_id(book);
    }

    // Ctrl-C cancels the answer in flight, or exits when idle.
    let cancel = chat.cancel_handle();
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if !cancel.cancel() {
                std::process::exit(130);
            }
        }
    });

    eprintln!("Session {} — /new, /sessions, /open <id>, /delete <id>, /quit", chat.session().session_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let (name, arg) = match command.split_once(' ') {
                Some((n, a)) => (n, a.trim()),
                None => (command, ""),
            };
            match name {
                "quit" | "exit" => break,
                "new" => {
                    chat.new_chat();
                    eprintln!("Started session {}", chat.session().session_id);
                }
                "sessions" => print_session_list(&chat.list_sessions()),
                "open" => match chat.select_session(arg) {
                    Ok(()) => print_session(chat.session()),
                    Err(e) => eprintln!("{}", e),
                },
                "delete" => match chat.delete_session(arg) {
                    Ok(()) => eprintln!("Deleted {}", arg),
                    Err(e) => eprintln!("{}", e),
                },
                _ => eprintln!("Unknown command: /{}", name),
            }
            continue;
        }

        print!("book> ");
        std::io::stdout().flush()?;
        let result = chat
            .send_message(line, |text| {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            })
            .await;
        println!();

        match result {
            Ok(SendOutcome::Completed) => {}
            Ok(SendOutcome::Cancelled) => eprintln!("(cancelled)"),
            Err(ControllerError::Transport(_)) => {
                if let Some(error) = chat.error() {
                    eprintln!("Error: {}", error);
                }
                chat.dismiss_error();
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}

fn do_sessions(data_dir: PathBuf) -> anyhow::Result<()> {
    let store = SessionStore::new(FileStore::new(data_dir));
    let mut sessions = store.load_sessions();
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    print_session_list(&sessions);
    Ok(())
}

fn do_show(data_dir: PathBuf, id: &str) -> anyhow::Result<()> {
    let store = SessionStore::new(FileStore::new(data_dir));
    match store.get_session(id) {
        Some(session) => {
            print_session(&session);
            Ok(())
        }
        None => anyhow::bail!("session not found: {}", id),
    }
}

fn do_delete(data_dir: PathBuf, id: &str) -> anyhow::Result<()> {
    let store = SessionStore::new(FileStore::new(data_dir));
    if store.get_session(id).is_none() {
        anyhow::bail!("session not found: {}", id);
    }
    store.delete_session(id)?;
    eprintln!("Deleted {}", id);
    Ok(())
}

/// Show the server status by calling GET /health.
async fn do_status(server: &str) -> anyhow::Result<()> {
    let transport = HttpTransport::new(server)?;
    let body = match transport.health().await {
        Ok(b) => b,
        Err(e) => {
            eprintln!("bookchat-cli: cannot reach {} — {}", transport.base_url(), e);
            std::process::exit(1);
        }
    };

    let flag = |v: &serde_json::Value| if v.as_bool().unwrap_or(false) { "yes" } else { "no" };
    println!("Bookchat server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
    println!("Model:           {}", body["model"].as_str().unwrap_or("?"));
    println!("Provider key:    {}", flag(&body["provider_configured"]));
    println!("Vector store:    {}", flag(&body["vector_store_configured"]));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Chat { session, book } => {
            do_chat(&server, cli.data_dir, !cli.no_stream, session, book).await
        }
        Commands::Sessions => do_sessions(cli.data_dir),
        Commands::Show { id } => do_show(cli.data_dir, &id),
        Commands::Delete { id } => do_delete(cli.data_dir, &id),
        Commands::Status => do_status(&server).await,
    };

    if let Err(e) = result {
        eprintln!("bookchat-cli: {}", e);
        std::process::exit(1);
    }
}
