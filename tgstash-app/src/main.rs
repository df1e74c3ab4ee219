//! tgstash: mirror Telegram chats and their media to local disk.
//!
//! `tgstash run` starts the sync worker. Every other command edits the local
//! store, which a running worker picks up on its own:
//!
//!   tgstash settings set tg_api_id 12345
//!   tgstash chats list
//!   tgstash chats enable 1234567890
//!
//! Logging: RUST_LOG=tgstash_sync=debug tgstash run

use std::collections::HashMap;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tgstash_sync::telegram::TelegramRemote;
use tgstash_sync::{ChatRecord, ChatRegistry, Config, Settings, Store, SyncWorker};
use tokio_util::sync::CancellationToken;

const DEFAULT_LOG_FILTER: &str = "tgstash_sync=info,tgstash=info";

#[derive(Parser)]
#[command(name = "tgstash", version, about = "Mirror Telegram chats and their media to local disk")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Log in and keep enabled chats mirrored until interrupted")]
    Run,
    #[command(about = "Inspect or change login data and sync settings")]
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    #[command(about = "Inspect known chats and choose which ones to mirror")]
    Chats {
        #[command(subcommand)]
        command: ChatsCommand,
    },
}

#[derive(Subcommand)]
enum SettingsCommand {
    #[command(about = "Print every setting")]
    List,
    #[command(about = "Change one setting")]
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum ChatsCommand {
    #[command(about = "Print known chats")]
    List(ChatsListArgs),
    #[command(about = "Start mirroring a chat")]
    Enable(ChatArg),
    #[command(about = "Stop mirroring a chat")]
    Disable(ChatArg),
    #[command(about = "Set the folder a chat's files are stored in (empty to reset)")]
    Rename {
        #[arg(allow_negative_numbers = true)]
        remote_id: i64,
        storage_name: String,
    },
}

#[derive(Args)]
struct ChatsListArgs {
    #[arg(long, help = "Only chats that are being mirrored")]
    enabled: bool,
}

#[derive(Args)]
struct ChatArg {
    #[arg(allow_negative_numbers = true, help = "Remote id as shown by `chats list`")]
    remote_id: i64,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_LOG_FILTER)).init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("✗ {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    let store = Store::new(&config.db_path);
    store.setup()?;

    match cli.command {
        Command::Run => run_worker(config, store).await,
        Command::Settings { command } => settings_command(command, store),
        Command::Chats { command } => chats_command(command, ChatRegistry::new(store)),
    }
}

async fn run_worker(config: Config, store: Store) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(store.clone())?;
    let remote = Arc::new(TelegramRemote::new(&config.session_path));
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("[tgstash] Interrupted, shutting down …");
        }
        shutdown.cancel();
    });

    tracing::info!("[tgstash] Downloads go to {}", config.download_dir.display());
    SyncWorker::new(remote, settings, ChatRegistry::new(store), &config.download_dir, cancel)
        .run()
        .await?;
    Ok(())
}

fn settings_command(command: SettingsCommand, store: Store) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(store)?;
    match command {
        SettingsCommand::List => {
            let mut all: Vec<_> = settings.snapshot().into_iter().collect();
            all.sort();
            for (key, value) in all {
                println!("{key:<22} {value}");
            }
        }
        SettingsCommand::Set { key, value } => {
            if settings.get(&key).is_none() {
                return Err(format!("unknown setting {key:?}").into());
            }
            let written = settings.update(&HashMap::from([(key.clone(), value)]))?;
            if written == 0 {
                println!("{key} unchanged");
            } else {
                println!("✓ {key} updated");
            }
        }
    }
    Ok(())
}

fn chats_command(command: ChatsCommand, registry: ChatRegistry) -> Result<(), Box<dyn std::error::Error>> {
    let (remote_id, found) = match command {
        ChatsCommand::List(args) => {
            let chats = if args.enabled { registry.list_enabled()? } else { registry.list_all()? };
            for chat in &chats {
                print_chat(chat);
            }
            return Ok(());
        }
        ChatsCommand::Enable(ChatArg { remote_id }) => (remote_id, registry.set_enabled(remote_id, true)?),
        ChatsCommand::Disable(ChatArg { remote_id }) => (remote_id, registry.set_enabled(remote_id, false)?),
        ChatsCommand::Rename { remote_id, storage_name } => {
            let name = Some(storage_name.as_str()).filter(|n| !n.is_empty());
            (remote_id, registry.set_storage_name(remote_id, name)?)
        }
    };

    if !found {
        return Err(format!("no chat with remote id {remote_id}, run `tgstash run` to refresh the list").into());
    }
    println!("✓ chat {remote_id} updated");
    Ok(())
}

fn print_chat(chat: &ChatRecord) {
    let kind = chat.kind.map(|k| k.as_str()).unwrap_or("?");
    let mark = if chat.enabled { "●" } else { "○" };
    let folder = match chat.storage_name.as_deref() {
        Some(name) if !name.is_empty() => format!("  → {name}"),
        _ => String::new(),
    };
    println!(
        "{mark} {:>14}  {:<11} {:>8}  {}{folder}",
        chat.remote_id, kind, chat.last_downloaded_id, chat.display_name
    );
}
