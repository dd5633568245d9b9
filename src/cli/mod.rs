pub mod commands;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "mgr-dashboard")]
#[command(about = "Manager dashboard - REST endpoint registry and access-control router")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Start the HTTP server (default)")]
    Serve {
        #[arg(long, help = "Listen port, overriding DASHBOARD_PORT")]
        port: Option<u16>,
    },

    #[command(about = "Build the route table, print it and exit")]
    Routes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let config = crate::config::config();

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => commands::serve::handle(config, port).await,
        Commands::Routes => commands::routes::handle(config, output_format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::parse_from(["mgr-dashboard"]);
        assert!(cli.command.is_none());
        assert_eq!(OutputFormat::from_cli(&cli), OutputFormat::Text);
    }

    #[test]
    fn routes_accepts_global_json_flag() {
        let cli = Cli::parse_from(["mgr-dashboard", "routes", "--json"]);
        assert!(matches!(cli.command, Some(Commands::Routes)));
        assert_eq!(OutputFormat::from_cli(&cli), OutputFormat::Json);
    }

    #[test]
    fn serve_takes_a_port() {
        let cli = Cli::parse_from(["mgr-dashboard", "serve", "--port", "9000"]);
        assert!(matches!(cli.command, Some(Commands::Serve { port: Some(9000) })));
    }
}
