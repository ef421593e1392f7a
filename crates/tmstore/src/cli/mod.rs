//! Command-line interface for tmstore.
//!
//! This module provides the CLI structure for the `tmstore` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    BackupCommand, ConfigCommand, DumpCommand, GetCommand, ProxyCommand, RemoveCommand,
    SetCommand, StatusCommand,
};

use crate::logging::Verbosity;

/// tmstore - Persistence for the transportation management dashboard
///
/// Reads and writes the dashboard's key-value data, keeping a local durable
/// copy and syncing to the hosted document through the document proxy.
#[derive(Debug, Parser)]
#[command(name = "tmstore")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use the local store only, never contacting the remote document
    #[arg(long, global = true)]
    pub local_only: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read a key
    Get(GetCommand),

    /// Write a key
    Set(SetCommand),

    /// Delete a key
    Remove(RemoveCommand),

    /// List keys
    Keys,

    /// Print the whole remote document
    Dump(DumpCommand),

    /// Create, list and restore backups
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Show local and remote status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Run the document proxy
    #[command(subcommand)]
    Proxy(ProxyCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::Trace,
            }
        }
    }
}
