use clap::{Parser, Subcommand};
use servicenow_mcp::Result;
use servicenow_mcp::commands::{list_tools, serve_mcp, show_status};
use servicenow_mcp::config::{run_interactive_config, show_config};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "servicenow_mcp=info,warn";

#[derive(Parser)]
#[command(name = "servicenow-mcp")]
#[command(about = "MCP server for creating and reading ServiceNow records")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the ServiceNow instance and credentials
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Start MCP server on stdio
    Serve,
    /// Check configuration and ServiceNow connectivity
    Status,
    /// List the tools the MCP server exposes
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr: stdout is the MCP transport
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Serve => {
            serve_mcp().await?;
        }
        Commands::Status => {
            show_status().await?;
        }
        Commands::Tools => {
            list_tools()?;
        }
    }

    Ok(())
}
