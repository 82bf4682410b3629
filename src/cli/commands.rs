//! CLI commands

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::core::state::AppState;
use crate::db::{Database, SessionFilter};
use crate::error::ChatError;
use crate::generation::ModelChoice;
use crate::llm::{Credential, Topic};
use crate::session::{ChatRequest, IncomingMessage};

#[derive(Parser)]
#[command(name = "focal")]
#[command(about = "Multi-provider LLM chat backend with persistent sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.focal/config.yml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Database path, overrides the config file
    #[arg(long, global = true)]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Send a message and stream the reply
    Chat {
        /// Session ID (created when unknown)
        session_id: String,

        message: String,

        /// Provider tag: local, openai, anthropic, gemini
        #[arg(long)]
        model: Option<String>,

        /// Provider-specific model name
        #[arg(long)]
        variant: Option<String>,

        #[arg(long)]
        api_key: Option<String>,

        /// Conversation topic, e.g. code
        #[arg(long)]
        topic: Option<String>,

        /// Display name for a new session
        #[arg(long)]
        name: Option<String>,
    },

    /// List sessions
    Sessions {
        /// Only archived sessions
        #[arg(long)]
        archived: bool,

        /// Only favorite sessions
        #[arg(long)]
        favorite: bool,
    },

    /// Show a session with its messages
    Show { session_id: String },

    /// Archive a session
    Archive {
        session_id: String,

        /// Unarchive instead
        #[arg(long)]
        undo: bool,
    },

    /// Mark a session as favorite
    Favorite {
        session_id: String,

        /// Remove the mark instead
        #[arg(long)]
        undo: bool,
    },

    /// Rename a session
    Rename { session_id: String, name: String },

    /// Delete a session and its messages
    Delete { session_id: String },

    /// Semantic search over stored messages
    Search {
        query: String,

        /// Number of results
        #[arg(short, default_value = "5")]
        k: usize,

        /// Restrict to one session
        #[arg(long)]
        session: Option<String>,

        /// Credential for the embedding provider
        #[arg(long)]
        api_key: Option<String>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    let db = Database::new(config.resolve_db_path()?)?;

    // Create a multi-threaded runtime for CLI operations
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let state = Arc::new(AppState::new(db, config)?);

        match cli.command {
            Commands::Serve { host, port } => {
                let host = host.unwrap_or_else(|| state.config.server.host.clone());
                let port = port.unwrap_or(state.config.server.port);
                tracing::info!("Starting server on {}:{}", host, port);

                crate::server::serve(state, &host, port).await
            }

            Commands::Chat {
                session_id,
                message,
                model,
                variant,
                api_key,
                topic,
                name,
            } => {
                chat(
                    &state,
                    session_id,
                    message,
                    ModelChoice { model, variant, api_key },
                    topic.map(|t| Topic::parse(&t)),
                    name,
                )
                .await
            }

            Commands::Sessions { archived, favorite } => {
                let filter = SessionFilter {
                    archived,
                    favorite,
                    ..SessionFilter::default()
                };
                let sessions = state.session_manager.list(&filter).await?;

                if sessions.is_empty() {
                    println!("No sessions found");
                } else {
                    for session in sessions {
                        println!(
                            "[{}] {}{}{} - {}",
                            session.session_id,
                            session.display_name,
                            if session.favorite { " *" } else { "" },
                            if session.archived { " (archived)" } else { "" },
                            session.created_at.format("%Y-%m-%d %H:%M")
                        );
                    }
                }
                Ok(())
            }

            Commands::Show { session_id } => {
                let conversation = state.session_manager.get_conversation(&session_id).await?;

                println!(
                    "{} ({})",
                    conversation.session.display_name, conversation.session.session_id
                );
                for message in conversation.messages {
                    println!("\n[{}] {}", message.role, message.content);
                }
                Ok(())
            }

            Commands::Archive { session_id, undo } => {
                let current = state.session_manager.get_conversation(&session_id).await?.session;
                state
                    .session_manager
                    .update_flags(&session_id, !undo, current.favorite)
                    .await?;

                println!("{} session: {}", if undo { "Unarchived" } else { "Archived" }, session_id);
                Ok(())
            }

            Commands::Favorite { session_id, undo } => {
                let current = state.session_manager.get_conversation(&session_id).await?.session;
                state
                    .session_manager
                    .update_flags(&session_id, current.archived, !undo)
                    .await?;

                println!("{} session: {}", if undo { "Unstarred" } else { "Starred" }, session_id);
                Ok(())
            }

            Commands::Rename { session_id, name } => {
                let session = state.session_manager.rename(&session_id, &name).await?;

                println!("Renamed session {} to {}", session.session_id, session.display_name);
                Ok(())
            }

            Commands::Delete { session_id } => {
                state.session_manager.delete(&session_id).await?;

                println!("Deleted session: {}", session_id);
                Ok(())
            }

            Commands::Search {
                query,
                k,
                session,
                api_key,
            } => {
                let hits = state
                    .search
                    .search(&query, k, session.as_deref(), Credential::from_option(api_key))
                    .await?;

                if hits.is_empty() {
                    println!("No matches found");
                } else {
                    for hit in hits {
                        println!(
                            "{:.3} [{}/{}] {}",
                            hit.score,
                            hit.message.session_id,
                            hit.message.message_id,
                            hit.message.content.chars().take(80).collect::<String>()
                        );
                    }
                }
                Ok(())
            }
        }
    })
}

/// One chat turn over the stored history, printed as it streams
async fn chat(
    state: &AppState,
    session_id: String,
    message: String,
    choice: ModelChoice,
    topic: Option<Topic>,
    name: Option<String>,
) -> Result<()> {
    let mut messages: Vec<IncomingMessage> = match state.session_manager.get_conversation(&session_id).await {
        Ok(conversation) => conversation
            .messages
            .into_iter()
            .map(|m| IncomingMessage::new(m.message_id, m.role.as_str(), m.content))
            .collect(),
        Err(ChatError::NotFound(_)) => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    messages.push(IncomingMessage::new(
        format!("msg_{}", uuid::Uuid::new_v4().simple()),
        "user",
        message,
    ));

    let mut request = ChatRequest::new(session_id, messages);
    request.session_name = name;
    request.choice = choice;
    request.topic = topic;

    let active = state.reconciler.begin(request).await?;
    let (tx, mut rx) = mpsc::channel::<String>(32);
    let generation = tokio::spawn(active.run(tx));

    let mut stdout = std::io::stdout();
    while let Some(fragment) = rx.recv().await {
        stdout.write_all(fragment.as_bytes())?;
        stdout.flush()?;
    }
    println!();

    generation.await??;
    Ok(())
}
