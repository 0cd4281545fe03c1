//! Convo Memory CLI
//!
//! A thin front-end over the conversation memory store: records exchanges,
//! files knowledge and prints context or search results as JSON.

use anyhow::Context;
use clap::{Parser, Subcommand};
use convo_memory::{resolve_home, ConversationMemoryStore, InteractionContext, MemoryConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Convo Memory - local conversation memory store
#[derive(Parser, Debug)]
#[command(name = "convo-memory")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Store home directory (defaults to $CONVO_MEMORY_HOME or ~/.convo-memory)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// User identifier whose memory is used
    #[arg(short, long, global = true, default_value = "default")]
    user: String,

    /// Verbose output: debug-level logs on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record an input/output exchange
    Record {
        input: String,
        output: String,
        /// Context entries as key=value
        #[arg(long = "context", value_parser = parse_key_val)]
        context: Vec<(String, String)>,
    },
    /// File a piece of information under a topic
    Learn { topic: String, information: String },
    /// Adjust relationship metrics by the given deltas
    Relate {
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        trust: f64,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        rapport: f64,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        understanding: f64,
    },
    /// Set display name and preferences
    Profile {
        #[arg(long)]
        name: Option<String>,
        /// Preferences as key=value
        #[arg(long = "pref", value_parser = parse_key_val)]
        preferences: Vec<(String, String)>,
    },
    /// Print recent interactions, knowledge and metrics
    Context {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Search interactions and knowledge topics
    Search { query: String },
    /// Print or write the full serialized state
    Export {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Replace the state with a serialized record
    Import { file: PathBuf },
    /// Keep only the most recent N interactions
    Prune { max: usize },
    /// Write a timestamped snapshot to the backup directory
    Backup,
    /// List users with stored memory
    Users,
    /// Close the session: stamp lastSession and bump totalSessions
    EndSession,
    /// Permanently delete the user's stored memory
    Wipe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let home = match cli.home {
        Some(home) => home,
        None => resolve_home()?,
    };
    let config = MemoryConfig::load(&home)?;
    info!("Memory home: {:?} ({} durability)", home, config.durability);

    let store = ConversationMemoryStore::new(config);
    run(&store, &cli.user, cli.command).await
}

async fn run(store: &ConversationMemoryStore, user: &str, command: Command) -> anyhow::Result<()> {
    // Commands that never load a state
    let command = match command {
        Command::Wipe => {
            store.wipe(user).await?;
            println!("Wiped memory for {}", user);
            return Ok(());
        }
        Command::Users => {
            for user in store.list_users().await? {
                println!("{}", user);
            }
            return Ok(());
        }
        other => other,
    };

    let mut state = store.load(user).await?;

    match command {
        Command::Record {
            input,
            output,
            context,
        } => {
            let interaction = store
                .record_interaction(&mut state, input, output, to_context(context))
                .await?;
            println!("{}", serde_json::to_string_pretty(&interaction)?);
        }
        Command::Learn { topic, information } => {
            store.add_knowledge(&mut state, &topic, information).await?;
        }
        Command::Relate {
            trust,
            rapport,
            understanding,
        } => {
            store
                .update_relationship(&mut state, trust, rapport, understanding)
                .await?;
            println!("{}", serde_json::to_string_pretty(&state.relationship)?);
        }
        Command::Profile { name, preferences } => {
            store
                .set_user_profile(&mut state, name, preferences.into_iter().collect())
                .await?;
            println!("{}", serde_json::to_string_pretty(&state.user)?);
        }
        Command::Context { limit } => {
            let context = store.get_context(&state, limit);
            println!("{}", serde_json::to_string_pretty(&context)?);
        }
        Command::Search { query } => {
            let matches = store.search(&state, &query);
            println!("{}", serde_json::to_string_pretty(&matches)?);
        }
        Command::Export { out } => {
            let payload = store.export_state(&state)?;
            match out {
                Some(path) => tokio::fs::write(&path, payload)
                    .await
                    .with_context(|| format!("failed to write export to {}", path.display()))?,
                None => println!("{}", payload),
            }
        }
        Command::Import { file } => {
            let payload = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            store.import_state(&mut state, &payload).await?;
        }
        Command::Prune { max } => {
            let evicted = store.prune(&mut state, max).await?;
            println!("Evicted {} interactions", evicted);
        }
        Command::Backup => {
            let path = store.backup(&state).await?;
            println!("{}", path.display());
        }
        Command::EndSession => {
            store.save(&mut state).await?;
            println!("Session {} closed", state.total_sessions);
        }
        Command::Wipe | Command::Users => {}
    }

    // Deferred durability: nothing above has written yet
    store.flush(&mut state).await?;
    Ok(())
}

fn to_context(pairs: Vec<(String, String)>) -> InteractionContext {
    pairs
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect()
}

/// Parse a `key=value` argument
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}
