//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Read a key.
#[derive(Debug, Args)]
pub struct GetCommand {
    /// The key to read
    pub key: String,

    /// Report the network as unavailable and read the local store only
    #[arg(long)]
    pub offline: bool,
}

/// Write a key.
#[derive(Debug, Args)]
pub struct SetCommand {
    /// The key to write
    pub key: String,

    /// The value to store (any string, usually JSON)
    pub value: String,
}

/// Delete a key.
#[derive(Debug, Args)]
pub struct RemoveCommand {
    /// The key to delete
    pub key: String,
}

/// Print the whole remote document.
#[derive(Debug, Args)]
pub struct DumpCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Backup commands.
#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// Snapshot the document into a new backup key
    Create,

    /// List backup keys, newest first
    List,

    /// Print a backup record
    Show {
        /// Backup key (backup_<millis>)
        key: String,
    },

    /// Write every entry of a backup back into the document
    Restore {
        /// Backup key (backup_<millis>)
        key: String,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Document proxy commands.
#[derive(Debug, Subcommand)]
pub enum ProxyCommand {
    /// Serve the document protocol, holding the master key server-side
    Serve {
        /// Address to listen on (overrides proxy.bind)
        #[arg(short, long, value_name = "ADDR")]
        bind: Option<String>,

        /// Keep the document in memory instead of the hosted store
        #[arg(long)]
        memory: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_command_debug() {
        let cmd = GetCommand {
            key: "missions".to_string(),
            offline: true,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("missions"));
        assert!(debug_str.contains("offline"));
    }

    #[test]
    fn test_backup_command_debug() {
        let cmd = BackupCommand::Restore {
            key: "backup_1".to_string(),
            yes: false,
        };
        assert!(format!("{cmd:?}").contains("backup_1"));
    }

    #[test]
    fn test_proxy_command_debug() {
        let cmd = ProxyCommand::Serve {
            bind: None,
            memory: true,
        };
        assert!(format!("{cmd:?}").contains("memory"));
    }
}
