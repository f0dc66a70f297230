mod agent_cmd;
mod config;
mod rollout_cmd;
mod send_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use vmctl_core::BraceMode;

use config::{AgentConfig, AgentOverrides};

#[derive(Parser)]
#[command(name = "vmctl", about = "Configure and start network-function agents over JSON/TCP")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the agent until Ctrl+C
    Agent {
        /// Agent config file (repeatable, merged in order)
        #[arg(short, long = "config")]
        config: Vec<PathBuf>,
        /// Address to bind (overrides VMCTL_ADDRESS)
        #[arg(long)]
        address: Option<String>,
        /// Port to bind (overrides VMCTL_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// How braces inside JSON strings are counted: lexical or string_aware
        #[arg(long)]
        framing: Option<BraceMode>,
    },
    /// Roll a configuration out to several agents
    Rollout {
        /// Rollout file (TOML)
        file: PathBuf,
    },
    /// Send raw JSON messages to one agent
    Send {
        /// Agent address (host:port)
        addr: String,
        /// JSON objects to send, in order
        #[arg(required = true)]
        messages: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Agent {
            config,
            address,
            port,
            framing,
        } => {
            let file = config::load_agent_files(&config)?;
            let resolved = AgentConfig::resolve(
                file,
                AgentOverrides {
                    address,
                    port,
                    framing,
                },
            )?;
            agent_cmd::run_agent(resolved).await?;
        }
        Commands::Rollout { file } => {
            rollout_cmd::run_rollout_file(&file).await?;
        }
        Commands::Send { addr, messages } => {
            send_cmd::send_messages(&addr, &messages).await?;
        }
    }

    Ok(())
}
