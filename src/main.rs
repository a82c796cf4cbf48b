use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rigger::server::{ServerConfig, start_server};

#[derive(Parser)]
#[command(name = "rigger")]
#[command(version, about = "Provisioning job runner with real-time output streaming")]
struct Cli {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "RIGGER_HOST")]
    host: String,

    /// Port to serve on
    #[arg(short, long, default_value = "8000", env = "RIGGER_PORT")]
    port: u16,

    /// Directory containing provisioning playbooks
    #[arg(
        long,
        default_value = "/opt/rigger/playbooks",
        env = "RIGGER_PLAYBOOK_DIR"
    )]
    playbook_dir: PathBuf,

    /// Binary used to execute playbooks
    #[arg(long, default_value = "ansible-playbook", env = "RIGGER_INTERPRETER")]
    interpreter: String,

    /// Allow cross-origin requests (for the SPA dev server)
    #[arg(long, env = "RIGGER_DEV_MODE")]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rigger=info")),
        )
        .init();

    let cli = Cli::parse();
    start_server(ServerConfig {
        host: cli.host,
        port: cli.port,
        playbook_dir: cli.playbook_dir,
        interpreter: cli.interpreter,
        dev_mode: cli.dev,
    })
    .await
}
