//! Parley CLI: inspect and maintain stored conversations and their context windows.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley_config::{CliOverrides, ParleyConfig};
use parley_context::{
    Attachment, ContextManager, Conversation, FileStore, TurnOrder, exclusion_warning, merge,
};
use parley_types::{Role, truncate_str};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "parley", version, about = "Conversation store with budgeted context windows")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Total context window size in tokens
    #[arg(long, global = true)]
    max_context_tokens: Option<u64>,

    /// Tokens held back for the model's reply
    #[arg(long, global = true)]
    response_reserve_tokens: Option<u64>,

    /// Token allowance for the system instruction
    #[arg(long, global = true)]
    system_prompt_tokens: Option<u64>,

    /// Directory holding stored conversations
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new conversation
    New {
        /// Owner of the conversation
        #[arg(long, default_value = "local")]
        owner: String,
        /// Optional title
        #[arg(long)]
        title: Option<String>,
    },
    /// Append a turn to a conversation
    Append {
        /// Conversation ID or unique prefix
        conversation: String,
        /// Who is speaking (user or assistant)
        #[arg(long, default_value = "user")]
        role: Role,
        /// Text of the turn
        #[arg(long, default_value = "")]
        text: String,
        /// Plain-text file to attach (repeatable)
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },
    /// Show the turns that would accompany the next request
    Window {
        conversation: String,
        /// Token budget for the window (defaults to the effective budget)
        #[arg(long)]
        budget: Option<u64>,
    },
    /// Report context usage
    Usage {
        conversation: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Count older turns a window would leave out
    Advise {
        conversation: String,
        /// Target window size in tokens (defaults to the effective budget)
        #[arg(long)]
        target: Option<u64>,
    },
    /// List active conversations
    List {
        #[arg(long)]
        owner: Option<String>,
    },
    /// Print a conversation's full history
    Show { conversation: String },
    /// Hide a conversation without discarding its turns
    Delete { conversation: String },
    /// Bring back a deleted conversation (full ID required)
    Restore { conversation: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = ParleyConfig::load(CliOverrides {
        max_context_tokens: cli.max_context_tokens,
        response_reserve_tokens: cli.response_reserve_tokens,
        system_prompt_tokens: cli.system_prompt_tokens,
        data_dir: cli.data_dir,
    })
    .context("Failed to load configuration")?;

    let store = FileStore::new(config.data_dir.clone())
        .await
        .with_context(|| format!("Failed to open store at {}", config.data_dir.display()))?;
    debug!(
        data_dir = %config.data_dir.display(),
        max_context_tokens = config.budget.max_context_tokens,
        effective_budget = config.budget.effective_budget(),
        "Opened conversation store"
    );
    let manager = ContextManager::new(Arc::new(store), config.budget, config.history);

    match cli.command {
        Command::New { owner, title } => {
            let conversation = manager.log().create(&owner, title).await?;
            println!("{}", conversation.id);
        }
        Command::Append {
            conversation,
            role,
            text,
            attachments,
        } => {
            let conversation = resolve(&manager, &conversation).await?;
            append(&manager, &conversation, role, &text, &attachments).await?;
        }
        Command::Window {
            conversation,
            budget,
        } => {
            let conversation = resolve(&manager, &conversation).await?;
            let budget = budget.unwrap_or(manager.budget().effective_budget());
            print_window(&manager, &conversation, budget).await?;
        }
        Command::Usage { conversation, json } => {
            let conversation = resolve(&manager, &conversation).await?;
            let usage = manager.usage(conversation.id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&usage)?);
            } else {
                println!("{}", usage.format_detailed());
            }
        }
        Command::Advise {
            conversation,
            target,
        } => {
            let conversation = resolve(&manager, &conversation).await?;
            let target = target.unwrap_or(manager.budget().effective_budget());
            let count = manager.advisory_trim_count(conversation.id, target).await?;
            println!("{count}");
            if let Some(warning) = exclusion_warning(count) {
                eprintln!("{warning}");
            }
        }
        Command::List { owner } => list(&manager, owner.as_deref()).await?,
        Command::Show { conversation } => {
            let conversation = resolve(&manager, &conversation).await?;
            show(&manager, &conversation).await?;
        }
        Command::Delete { conversation } => {
            let conversation = resolve(&manager, &conversation).await?;
            manager.log().delete(conversation.id).await?;
            eprintln!("Deleted conversation {}", conversation.short_id());
        }
        Command::Restore { conversation } => {
            let restored = manager.log().restore(conversation).await?;
            eprintln!("Restored conversation {}", restored.short_id());
        }
    }

    Ok(())
}

/// Look up a conversation by full ID or unique prefix.
async fn resolve(manager: &ContextManager, reference: &str) -> Result<Conversation> {
    let conversation = match Uuid::parse_str(reference) {
        Ok(id) => manager.log().conversation(id).await?,
        Err(_) => manager.log().find_by_prefix(reference).await?,
    };
    Ok(conversation)
}

async fn append(
    manager: &ContextManager,
    conversation: &Conversation,
    role: Role,
    text: &str,
    paths: &[PathBuf],
) -> Result<()> {
    let mut attachments = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read attachment {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        attachments.push(Attachment::from_plain_text(name, &data));
    }

    let content = merge(text, &attachments);
    let estimated = manager.budget().check_message(&content)?;
    debug!(
        conversation = %conversation.id,
        attachments = attachments.len(),
        estimated,
        "Appending turn"
    );

    let turn = manager
        .log()
        .append(conversation.id, role, content, !attachments.is_empty())
        .await?;
    eprintln!(
        "Appended {} turn #{} (~{} tokens)",
        turn.role, turn.seq, turn.token_count
    );

    let usage = manager.usage(conversation.id).await?;
    eprintln!("{}", usage.format_brief());
    Ok(())
}

async fn print_window(
    manager: &ContextManager,
    conversation: &Conversation,
    budget: u64,
) -> Result<()> {
    let window = manager.build_window(conversation.id, budget).await?;
    for turn in &window.turns {
        println!(
            "#{:<4} {:<9} {:>6} tok  {}",
            turn.seq,
            turn.role,
            turn.token_count,
            preview(&turn.content)
        );
    }
    eprintln!(
        "{} turns, {} of {} tokens (excluded: {}{})",
        window.len(),
        window.total_tokens,
        window.budget_tokens,
        window.excluded,
        if window.truncated { ", newest truncated" } else { "" }
    );
    Ok(())
}

async fn list(manager: &ContextManager, owner: Option<&str>) -> Result<()> {
    let summaries = manager.log().list(owner).await?;
    if summaries.is_empty() {
        eprintln!("No saved conversations.");
        return Ok(());
    }
    for s in &summaries {
        let title = s.title.as_deref().unwrap_or("");
        let title_str = if title.is_empty() {
            String::new()
        } else {
            format!(" [{title}]")
        };
        println!(
            "  {} {:>8}  {:>3} msgs  {:>6} tok  {}{}  {}",
            s.short_id(),
            s.age(),
            s.message_count,
            s.total_tokens,
            s.owner,
            title_str,
            if s.preview.is_empty() {
                "(empty)"
            } else {
                &s.preview
            }
        );
    }
    Ok(())
}

async fn show(manager: &ContextManager, conversation: &Conversation) -> Result<()> {
    println!(
        "Conversation {} (owner: {}, {} messages)",
        conversation.id, conversation.owner, conversation.total_messages
    );
    let history = manager
        .log()
        .history(conversation.id, TurnOrder::OldestFirst)
        .await?;
    for turn in &history {
        let drift = if turn.verify_fingerprint() {
            ""
        } else {
            " (content changed since it was stored)"
        };
        println!(
            "\n[{}] {} #{}{}",
            turn.created_at.format("%Y-%m-%d %H:%M:%S"),
            turn.role,
            turn.seq,
            drift
        );
        println!("{}", turn.content);
    }
    Ok(())
}

fn preview(content: &str) -> String {
    let line = content.lines().next().unwrap_or("");
    let short = truncate_str(line, 60);
    if short.len() < content.len() {
        format!("{short}...")
    } else {
        short.to_string()
    }
}
