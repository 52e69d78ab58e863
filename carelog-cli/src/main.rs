use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod db;
mod sync;

use commands::{ConfigCommand, EntryCommand, EntrySubcommand, SyncCommand};
use config::Config;
use sync::try_auto_sync;

#[derive(Parser)]
#[command(name = "carelog")]
#[command(version)]
#[command(about = "Offline-first child-care journal", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record, edit and list entries
    Entry(EntryCommand),

    /// Manage configuration
    Config(ConfigCommand),

    /// Sync with remote server
    Sync(SyncCommand),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CARELOG_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::load(cli.config)?;

    // Auto-sync BEFORE read commands
    if is_read_command(&cli.command) {
        try_auto_sync(&config);
    }

    let result = execute_command(&cli.command, &config);

    // Auto-sync AFTER write commands (only if command succeeded)
    if result.is_ok() && is_write_command(&cli.command) {
        try_auto_sync(&config);
    }

    result
}

fn execute_command(
    command: &Option<Commands>,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Some(Commands::Entry(cmd)) => {
            cmd.run(config)?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(config)?;
        }
        Some(Commands::Sync(cmd)) => {
            cmd.run(config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

/// Returns true if the command is a read operation that should sync before execution.
fn is_read_command(cmd: &Option<Commands>) -> bool {
    matches!(
        cmd,
        Some(Commands::Entry(e)) if matches!(e.command, EntrySubcommand::List { .. })
    )
}

/// Returns true if the command is a write operation that should sync after execution.
fn is_write_command(cmd: &Option<Commands>) -> bool {
    matches!(
        cmd,
        Some(Commands::Entry(e)) if matches!(e.command,
            EntrySubcommand::Add { .. }
            | EntrySubcommand::Update { .. }
            | EntrySubcommand::Delete { .. }
            | EntrySubcommand::Deactivate { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Option<Commands> {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn test_write_commands_trigger_auto_sync() {
        let add = parse(&["carelog", "entry", "add", "note", "--data", "{}"]);
        assert!(is_write_command(&add));
        assert!(!is_read_command(&add));

        let deactivate = parse(&["carelog", "entry", "deactivate", "med-1"]);
        assert!(is_write_command(&deactivate));

        let list = parse(&["carelog", "entry", "list", "feeding"]);
        assert!(is_read_command(&list));
        assert!(!is_write_command(&list));

        let sync = parse(&["carelog", "sync", "push"]);
        assert!(!is_write_command(&sync));
        assert!(!is_read_command(&sync));
    }

    #[test]
    fn test_unknown_entry_type_is_rejected() {
        assert!(Cli::try_parse_from(["carelog", "entry", "list", "diaper"]).is_err());
    }
}
