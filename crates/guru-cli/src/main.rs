//! guru CLI - AI tutor chat in the terminal

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use guru_core::onboarding::OnboardingFlag;
use guru_core::request::check_attachment;
use guru_core::session::RETRY_PROMPT;
use guru_core::{
    ChatSession, ChatStore, Classifier, Config, Draft, SendOutcome, SessionSettings,
    SqliteStorage,
};
use guru_provider::OpenAiProvider;
use tracing_subscriber::EnvFilter;

mod pretty;
mod repl;

type Session = ChatSession<OpenAiProvider, Arc<SqliteStorage>>;

#[derive(Debug, Parser)]
#[command(
    name = "guru",
    author,
    version,
    about = "AI tutor chat with local history",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Chat interactively, continuing the most recent chat
    Chat {
        /// Start a new chat instead
        #[arg(long)]
        new: bool,

        /// Continue a specific chat
        #[arg(long, conflicts_with = "new")]
        resume: Option<String>,

        /// Start with web search enabled
        #[arg(long)]
        search: bool,
    },

    /// Ask a single question and print the reply
    Ask {
        /// Question text
        #[arg(required = true)]
        text: Vec<String>,

        /// Image to attach
        #[arg(long)]
        attach: Option<PathBuf>,

        /// Answer with web search
        #[arg(long)]
        search: bool,

        /// Add the question to an existing chat
        #[arg(long)]
        chat: Option<String>,
    },

    /// List saved chats grouped by category
    List {
        /// Only chats in this category
        #[arg(long)]
        category: Option<String>,

        /// Only favorites
        #[arg(long)]
        favorites: bool,
    },

    /// Show a chat
    Show {
        /// Chat ID
        id: String,
    },

    /// Delete a chat
    Delete {
        /// Chat ID
        id: String,
    },

    /// Toggle a chat's favorite flag
    Favorite {
        /// Chat ID
        id: String,
    },

    /// Delete every saved chat
    Clear {
        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },

    /// Inspect or change the onboarding flag
    Onboarding {
        #[command(subcommand)]
        command: OnboardingCommand,
    },
}

#[derive(Debug, Subcommand)]
enum OnboardingCommand {
    /// Show whether onboarding was completed
    Status,

    /// Mark onboarding as completed
    Done,

    /// Show onboarding again on the next chat
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load config
    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let config = Config::ensure_at(&config_path)?;

    // Open storage
    let storage = Arc::new(SqliteStorage::open(&config.database).await?);
    let store = ChatStore::new(Arc::clone(&storage));

    match cli.command {
        Command::Chat {
            new,
            resume,
            search,
        } => cmd_chat(&config, storage, new, resume, search).await,
        Command::Ask {
            text,
            attach,
            search,
            chat,
        } => cmd_ask(&config, storage, &text.join(" "), attach, search, chat).await,
        Command::List {
            category,
            favorites,
        } => cmd_list(&store, category, favorites).await,
        Command::Show { id } => cmd_show(&store, &id).await,
        Command::Delete { id } => {
            store.delete(&id).await?;
            println!("Deleted {id}");
            Ok(())
        }
        Command::Favorite { id } => cmd_favorite(&store, &id).await,
        Command::Clear { yes } => {
            if !yes {
                println!("This deletes every saved chat. Re-run with --yes to confirm.");
                return Ok(());
            }
            store.delete_all().await?;
            println!("All chats deleted.");
            Ok(())
        }
        Command::Onboarding { command } => cmd_onboarding(storage, command).await,
    }
}

fn open_session(config: &Config, storage: Arc<SqliteStorage>) -> Result<Session> {
    let provider = OpenAiProvider::new(&config.provider)?;
    Ok(ChatSession::new(
        provider,
        ChatStore::new(storage),
        Classifier::new(config.provider.classifier_model.clone()),
        SessionSettings::from_config(config),
    ))
}

async fn cmd_chat(
    config: &Config,
    storage: Arc<SqliteStorage>,
    new: bool,
    resume: Option<String>,
    search: bool,
) -> Result<()> {
    let onboarding = OnboardingFlag::load(Arc::clone(&storage)).await;
    let session = open_session(config, storage)?;

    if !onboarding.has_seen() {
        pretty::print_welcome();
        onboarding.mark_seen().await?;
    }

    if let Some(id) = resume {
        if !session.resume(&id).await? {
            anyhow::bail!("Chat not found: {id}");
        }
    } else if !new && let Err(err) = session.resume_latest().await {
        tracing::warn!(error = %err, "Could not load history, starting a new chat");
    }

    if search {
        session.toggle_search_mode();
    }

    repl::run(&session).await
}

async fn cmd_ask(
    config: &Config,
    storage: Arc<SqliteStorage>,
    text: &str,
    attach: Option<PathBuf>,
    search: bool,
    chat: Option<String>,
) -> Result<()> {
    let session = open_session(config, storage)?;
    if let Some(id) = chat
        && !session.resume(&id).await?
    {
        anyhow::bail!("Chat not found: {id}");
    }
    if search {
        session.toggle_search_mode();
    }

    let mut draft = Draft::text(text);
    if let Some(path) = attach {
        let uri = path.to_string_lossy().into_owned();
        check_attachment(&uri)
            .await
            .with_context(|| format!("Cannot attach {uri}"))?;
        draft = draft.with_attachment(uri);
    }

    match session.send(draft).await {
        SendOutcome::Completed { .. } => {
            if let Some(reply) = session.messages().last() {
                println!("{}", reply.text);
                pretty::print_sources(reply);
            }
            println!("{}", style(format!("chat: {}", session.chat_id())).dim());
            Ok(())
        }
        SendOutcome::Failed(err) => {
            eprintln!("{}", style(RETRY_PROMPT).red());
            Err(err.into())
        }
        SendOutcome::Ignored => anyhow::bail!("Nothing to send"),
        SendOutcome::Rejected | SendOutcome::Discarded => {
            anyhow::bail!("The reply could not be delivered")
        }
    }
}

async fn cmd_list(
    store: &ChatStore<Arc<SqliteStorage>>,
    category: Option<String>,
    favorites: bool,
) -> Result<()> {
    let mut chats = match &category {
        Some(category) => store.list_by_category(category).await?,
        None => store.list_recent().await?,
    };
    if favorites {
        chats.retain(|c| c.is_favorite);
    }
    pretty::print_chat_list(&chats);
    Ok(())
}

async fn cmd_show(store: &ChatStore<Arc<SqliteStorage>>, id: &str) -> Result<()> {
    let chat = store
        .get_by_id(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Chat not found: {id}"))?;
    pretty::print_chat(&chat);
    Ok(())
}

async fn cmd_favorite(store: &ChatStore<Arc<SqliteStorage>>, id: &str) -> Result<()> {
    match store.toggle_favorite(id).await? {
        Some(true) => println!("★ {id} added to favorites"),
        Some(false) => println!("{id} removed from favorites"),
        None => anyhow::bail!("Chat not found: {id}"),
    }
    Ok(())
}

async fn cmd_onboarding(storage: Arc<SqliteStorage>, command: OnboardingCommand) -> Result<()> {
    let flag = OnboardingFlag::load(storage).await;
    match command {
        OnboardingCommand::Status => {
            let status = if flag.has_seen() { "completed" } else { "pending" };
            println!("Onboarding: {status}");
        }
        OnboardingCommand::Done => {
            flag.mark_seen().await?;
            println!("Onboarding marked as completed.");
        }
        OnboardingCommand::Reset => {
            flag.reset().await?;
            println!("Onboarding will be shown on the next chat.");
        }
    }
    Ok(())
}
