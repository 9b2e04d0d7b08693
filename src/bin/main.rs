//! MemoryOS CLI, a thin client over the HTTP API.
//!
//! Commands:
//! - `store`, `get`, `search`: agent memories
//! - `context`: assemble a token-budgeted context artifact
//! - `stats`: memory statistics for an agent
//! - `shared`: team shared entries
//! - `skill`: agent skills and practice

use clap::{Parser, Subcommand};
use memoryos::api::{
    ContextParams, CreateSharedRequest, GrantRequest, SharedKey, StoreMemoryRequest,
    UpdateSharedRequest,
};
use memoryos::{MemoryOsClient, MemoryType, Permission, Skill};
use serde::Serialize;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "memoryos",
    about = "MemoryOS - shared memory for cooperating agents",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL
    #[arg(long, global = true, env = "MEMORYOS_URL", default_value = "http://127.0.0.1:8080")]
    url: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a memory for an agent
    Store {
        #[arg(short, long)]
        agent: String,
        /// episodic, semantic, skill, working or shared
        #[arg(short = 't', long = "type", default_value = "episodic")]
        memory_type: MemoryType,
        content: String,
        #[arg(short, long)]
        importance: Option<f64>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Fetch one memory
    Get {
        #[arg(short, long)]
        agent: String,
        #[arg(short = 't', long = "type")]
        memory_type: MemoryType,
        id: String,
    },

    /// Keyword search over an agent's memories
    Search {
        #[arg(short, long)]
        agent: String,
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Assemble a context artifact
    Context {
        #[arg(short, long)]
        agent: String,
        #[arg(short, long)]
        max_tokens: Option<i64>,
        #[arg(short, long)]
        strategy: Option<String>,
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Memory statistics
    Stats {
        #[arg(short, long)]
        agent: String,
    },

    /// Team shared entries
    Shared {
        #[command(subcommand)]
        command: SharedCommands,
    },

    /// Agent skills
    Skill {
        #[command(subcommand)]
        command: SkillCommands,
    },
}

#[derive(clap::Args)]
struct EntryArgs {
    #[arg(long)]
    team: String,
    #[arg(short, long)]
    key: String,
    #[arg(short, long)]
    agent: String,
}

impl EntryArgs {
    fn shared_key(&self) -> SharedKey {
        SharedKey {
            team_id: self.team.clone(),
            key: self.key.clone(),
            agent_id: self.agent.clone(),
        }
    }
}

#[derive(Subcommand)]
enum SharedCommands {
    Create {
        #[command(flatten)]
        entry: EntryArgs,
        value: String,
    },
    Get {
        #[command(flatten)]
        entry: EntryArgs,
    },
    Update {
        #[command(flatten)]
        entry: EntryArgs,
        value: String,
        /// Version the update is based on
        #[arg(short, long)]
        expected: u64,
    },
    Delete {
        #[command(flatten)]
        entry: EntryArgs,
    },
    Lock {
        #[command(flatten)]
        entry: EntryArgs,
    },
    Unlock {
        #[command(flatten)]
        entry: EntryArgs,
    },
    Grant {
        #[command(flatten)]
        entry: EntryArgs,
        /// Agent receiving the permission
        target: String,
        /// read or write
        permission: Permission,
    },
}

#[derive(Subcommand)]
enum SkillCommands {
    Register {
        #[arg(short, long)]
        agent: String,
        name: String,
        #[arg(short, long, default_value = "general")]
        category: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(short, long, default_value_t = 0.0)]
        mastery: f64,
    },
    Get {
        #[arg(short, long)]
        agent: String,
        name: String,
    },
    List {
        #[arg(short, long)]
        agent: String,
        #[arg(short, long)]
        category: Option<String>,
    },
    Practice {
        #[arg(short, long)]
        agent: String,
        name: String,
        /// Record a failed attempt
        #[arg(long)]
        failed: bool,
    },
}

fn print<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let client = MemoryOsClient::new(cli.url)?;
    debug!(url = client.base_url(), "using MemoryOS API");

    match cli.command {
        Commands::Store {
            agent,
            memory_type,
            content,
            importance,
            tags,
        } => {
            let id = client
                .store_memory(&StoreMemoryRequest {
                    id: None,
                    agent_id: agent,
                    memory_type,
                    content,
                    importance,
                    tags,
                    metadata: Default::default(),
                })
                .await?;
            println!("{}", id);
        }
        Commands::Get {
            agent,
            memory_type,
            id,
        } => print(&client.get_memory(&agent, memory_type, &id).await?)?,
        Commands::Search {
            agent,
            query,
            limit,
        } => print(&client.search(&agent, &query, limit).await?)?,
        Commands::Context {
            agent,
            max_tokens,
            strategy,
            query,
        } => {
            let artifact = client
                .context(&ContextParams {
                    agent_id: agent,
                    max_tokens,
                    strategy,
                    query,
                })
                .await?;
            print(&artifact)?;
        }
        Commands::Stats { agent } => print(&client.stats(&agent).await?)?,
        Commands::Shared { command } => run_shared(&client, command).await?,
        Commands::Skill { command } => run_skill(&client, command).await?,
    }

    Ok(())
}

async fn run_shared(
    client: &MemoryOsClient,
    command: SharedCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        SharedCommands::Create { entry, value } => {
            let created = client
                .create_shared(&CreateSharedRequest {
                    team_id: entry.team,
                    key: entry.key,
                    agent_id: entry.agent,
                    value,
                })
                .await?;
            print(&created)?;
        }
        SharedCommands::Get { entry } => print(&client.read_shared(&entry.shared_key()).await?)?,
        SharedCommands::Update {
            entry,
            value,
            expected,
        } => {
            let version = client
                .update_shared(&UpdateSharedRequest {
                    team_id: entry.team,
                    key: entry.key,
                    agent_id: entry.agent,
                    value,
                    expected_version: expected,
                })
                .await?;
            println!("version {}", version);
        }
        SharedCommands::Delete { entry } => {
            client.delete_shared(&entry.shared_key()).await?;
            println!("deleted {}/{}", entry.team, entry.key);
        }
        SharedCommands::Lock { entry } => {
            client.lock_shared(&entry.shared_key()).await?;
            println!("locked {}/{}", entry.team, entry.key);
        }
        SharedCommands::Unlock { entry } => {
            client.unlock_shared(&entry.shared_key()).await?;
            println!("unlocked {}/{}", entry.team, entry.key);
        }
        SharedCommands::Grant {
            entry,
            target,
            permission,
        } => {
            client
                .grant_shared(&GrantRequest {
                    team_id: entry.team.clone(),
                    key: entry.key.clone(),
                    agent_id: entry.agent,
                    target_agent: target.clone(),
                    permission,
                })
                .await?;
            println!("granted {} on {}/{} to {}", permission, entry.team, entry.key, target);
        }
    }

    Ok(())
}

async fn run_skill(
    client: &MemoryOsClient,
    command: SkillCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        SkillCommands::Register {
            agent,
            name,
            category,
            description,
            mastery,
        } => {
            let skill = Skill::new(name, category)
                .with_description(description)
                .with_mastery(mastery);
            print(&client.register_skill(&agent, skill).await?)?;
        }
        SkillCommands::Get { agent, name } => print(&client.get_skill(&agent, &name).await?)?,
        SkillCommands::List { agent, category } => {
            print(&client.list_skills(&agent, category.as_deref()).await?)?
        }
        SkillCommands::Practice {
            agent,
            name,
            failed,
        } => print(&client.practice(&agent, &name, !failed).await?)?,
    }

    Ok(())
}
