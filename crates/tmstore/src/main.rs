//! `tmstore` - CLI for the dashboard persistence layer
//!
//! This binary reads and writes the dashboard's key-value data, manages
//! backups of the remote document, and runs the document proxy.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::error::Error;
use std::sync::Arc;

use clap::Parser;

use tmstore::cli::{
    BackupCommand, Cli, Command, ConfigCommand, DumpCommand, GetCommand, ProxyCommand,
    StatusCommand,
};
use tmstore::document::Document;
use tmstore::proxy::{self, ProxyState};
use tmstore::{
    init_logging, Config, Connectivity, KeyValueStore, LocalStore, RemoteBackedStore,
    RemoteClient,
};

type CliResult = Result<(), Box<dyn Error>>;

/// Stores wired together for one command.
struct App {
    local: Arc<LocalStore>,
    remote: Arc<RemoteClient>,
    facade: Option<Arc<RemoteBackedStore>>,
    store: Arc<dyn KeyValueStore>,
}

impl App {
    fn open(config: &Config, local_only: bool) -> Result<Self, Box<dyn Error>> {
        let local = Arc::new(LocalStore::open(config.database_path())?);
        let remote = Arc::new(
            RemoteClient::new(&config.remote, Arc::clone(&local))?
                .with_backup_version(config.backup.version_tag.clone()),
        );

        let (facade, store): (_, Arc<dyn KeyValueStore>) = if local_only {
            (None, Arc::clone(&local) as Arc<dyn KeyValueStore>)
        } else {
            let facade = Arc::new(RemoteBackedStore::new(
                Arc::clone(&local),
                Arc::clone(&remote),
                Connectivity::default(),
            ));
            (Some(Arc::clone(&facade)), facade as Arc<dyn KeyValueStore>)
        };

        Ok(Self {
            local,
            remote,
            facade,
            store,
        })
    }

    /// Wait for background remote writes before the process exits.
    async fn flush(&self) -> CliResult {
        if let Some(facade) = &self.facade {
            let report = facade.flush().await?;
            if report.failed > 0 {
                eprintln!(
                    "warning: {} remote write(s) failed; values are kept locally",
                    report.failed
                );
            } else if !facade.remote().is_online() {
                eprintln!("warning: remote document unreachable; values are kept locally");
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
        Command::Proxy(proxy_cmd) => handle_proxy(&config, proxy_cmd).await,
        command => {
            let app = App::open(&config, cli.local_only)?;
            run(&app, command).await
        }
    }
}

async fn run(app: &App, command: Command) -> CliResult {
    match command {
        Command::Get(get_cmd) => handle_get(app, &get_cmd).await,
        Command::Set(set_cmd) => {
            app.store.set(&set_cmd.key, &set_cmd.value).await?;
            app.flush().await
        }
        Command::Remove(remove_cmd) => {
            if !app.store.remove(&remove_cmd.key).await? {
                eprintln!("{}: not found locally", remove_cmd.key);
            }
            app.flush().await
        }
        Command::Keys => {
            for key in app.store.keys().await? {
                println!("{key}");
            }
            Ok(())
        }
        Command::Dump(dump_cmd) => handle_dump(app, &dump_cmd).await,
        Command::Backup(backup_cmd) => handle_backup(app, backup_cmd).await,
        Command::Status(status_cmd) => handle_status(app, &status_cmd).await,
        Command::Config(_) | Command::Proxy(_) => Ok(()),
    }
}

async fn handle_get(app: &App, cmd: &GetCommand) -> CliResult {
    if cmd.offline {
        if let Some(facade) = &app.facade {
            facade.connectivity().set_online(false);
        }
    }

    match app.store.get(&cmd.key).await? {
        Some(value) => {
            println!("{value}");
            Ok(())
        }
        None => Err(format!("{}: not found", cmd.key).into()),
    }
}

async fn handle_dump(app: &App, cmd: &DumpCommand) -> CliResult {
    let document: Document = if app.facade.is_some() {
        app.remote.get_all_data().await
    } else {
        app.local.all()?
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        for (key, value) in &document {
            println!("{key} = {value}");
        }
    }
    Ok(())
}

async fn handle_backup(app: &App, cmd: BackupCommand) -> CliResult {
    match cmd {
        BackupCommand::Create => {
            let record = app.remote.create_backup().await?;
            println!(
                "Backed up {} entries at {}",
                record.data.len(),
                record.timestamp
            );
        }
        BackupCommand::List => {
            let backups = app.remote.list_backups().await?;
            if backups.is_empty() {
                println!("No backups.");
            }
            for key in backups {
                println!("{key}");
            }
        }
        BackupCommand::Show { key } => {
            let record = app.remote.load_backup(&key).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        BackupCommand::Restore { key, yes } => {
            if !yes {
                println!("This will overwrite current values with the contents of {key}.");
                println!("Use --yes to confirm.");
                return Ok(());
            }
            let restored = app.remote.restore_backup(&key).await?;
            println!("Restored {restored} entries from {key}");
        }
    }
    Ok(())
}

async fn handle_status(app: &App, cmd: &StatusCommand) -> CliResult {
    let stats = app.local.stats()?;
    let remote = if app.facade.is_some() {
        Some(app.remote.fetch().await)
    } else {
        None
    };

    if cmd.json {
        let remote_json = match &remote {
            None => serde_json::json!({ "enabled": false }),
            Some(Ok(snapshot)) => serde_json::json!({
                "enabled": true,
                "reachable": true,
                "entries": snapshot.document.len(),
                "version": snapshot.version,
            }),
            Some(Err(e)) => serde_json::json!({
                "enabled": true,
                "reachable": false,
                "error": e.to_string(),
            }),
        };
        let status = serde_json::json!({
            "local": {
                "database_path": app.local.path(),
                "entries": stats.total_entries,
                "last_updated": stats.last_updated,
                "size_bytes": stats.db_size_bytes,
            },
            "remote": remote_json,
            "document_url": app.remote.document_url(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("tmstore status");
        println!("--------------");
        println!("Database:      {}", app.local.path().display());
        println!("Local entries: {}", stats.total_entries);
        if let Some(last) = stats.last_updated {
            println!("Last write:    {}", last.to_rfc3339());
        }
        println!("Document:      {}", app.remote.document_url());
        match remote {
            None => println!("Remote:        disabled (--local-only)"),
            Some(Ok(snapshot)) => println!(
                "Remote:        reachable, {} entries, version {}",
                snapshot.document.len(),
                snapshot.version.as_deref().unwrap_or("unknown")
            ),
            Some(Err(e)) => println!("Remote:        unreachable ({e})"),
        }
    }
    Ok(())
}

async fn handle_proxy(config: &Config, cmd: ProxyCommand) -> CliResult {
    match cmd {
        ProxyCommand::Serve { bind, memory } => {
            let addr = match bind {
                Some(bind) => bind
                    .parse()
                    .map_err(|_| format!("invalid bind address: {bind}"))?,
                None => config.bind_addr()?,
            };
            let backend = proxy::backend_from_config(config, memory)?;
            let state = ProxyState::new(config.remote.document_id.clone(), backend);
            proxy::serve(addr, state).await?;
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> CliResult {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Local]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Remote]");
                println!("  Endpoint:           {}", config.remote.endpoint);
                println!("  Document id:        {}", config.remote.document_id);
                println!(
                    "  Request timeout:    {}s",
                    config.remote.request_timeout_secs
                );
                println!(
                    "  Conflict retries:   {}",
                    config.remote.max_conflict_retries
                );
                println!();
                println!("[Proxy]");
                println!("  Bind:               {}", config.proxy.bind);
                println!("  Upstream:           {}", config.proxy.upstream);
                println!(
                    "  Master key:         {}",
                    if config.proxy.master_key.is_some() {
                        "set"
                    } else {
                        "not set"
                    }
                );
                println!();
                println!("[Backup]");
                println!("  Version tag:        {}", config.backup.version_tag);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => return Err(format!("Configuration error: {e}").into()),
            }
        }
    }
    Ok(())
}
