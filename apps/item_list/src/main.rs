use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{load_config, ControllerEvent, ItemListController, ParseStore};
use shared::domain::{Item, ItemId};
use tokio::sync::broadcast::{
    error::{RecvError, TryRecvError},
    Receiver,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "item_list", about = "Live item list backed by a Parse server")]
struct Cli {
    /// TOML file with connection settings; defaults to ./item_list.toml.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every item.
    List,
    Add {
        name: String,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    Delete {
        id: String,
    },
    /// Print the list again on every change until Ctrl-C.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())
        .context("loading configuration")?
        .validate()
        .context("validating configuration")?;
    info!(endpoint = %config.endpoint_url, class = %config.class_name, "starting item list");
    let store = ParseStore::connect(config)
        .await
        .context("preparing remote store client")?;
    let controller = ItemListController::new(Arc::new(store));
    let mut events = controller.subscribe_events();
    let prints_list = matches!(cli.command, Command::List);

    let outcome = match cli.command {
        Command::List => controller
            .load_initial()
            .await
            .map(|_| ())
            .context("fetching items"),
        Command::Add { name, file } => add(&controller, name, file).await,
        Command::Delete { id } => controller
            .submit_delete(&ItemId::new(id.clone()))
            .await
            .map(|()| println!("deleted {id}"))
            .with_context(|| format!("deleting {id}")),
        Command::Watch => watch(&controller, &mut events).await,
    };
    print_pending_alerts(&mut events);
    if outcome.is_ok() && prints_list {
        print_items(&controller.items().await);
    }

    controller.dispose().await;
    outcome
}

async fn add(
    controller: &Arc<ItemListController<ParseStore>>,
    name: String,
    file: Option<PathBuf>,
) -> Result<()> {
    if let Some(path) = file {
        controller
            .attach_path(&path)
            .await
            .with_context(|| format!("attaching {}", path.display()))?;
    }
    controller.set_pending_name(name).await?;
    let item = controller.submit_add().await.context("adding item")?;
    println!("created {}", format_item(&item));
    Ok(())
}

async fn watch(
    controller: &Arc<ItemListController<ParseStore>>,
    events: &mut Receiver<ControllerEvent>,
) -> Result<()> {
    controller.load_initial().await.context("fetching items")?;
    controller
        .subscribe()
        .await
        .context("opening live query")?;

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("interrupted; closing feed");
                break;
            }
            event = events.recv() => match event {
                Ok(ControllerEvent::ListChanged(items)) => print_items(&items),
                Ok(ControllerEvent::Alert { kind, message }) => {
                    eprintln!("[{}] {message}", kind.as_str());
                }
                Ok(ControllerEvent::FeedClosed) => {
                    warn!("live query closed by server");
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "display fell behind; showing latest state");
                    print_items(&controller.items().await);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

fn print_pending_alerts(events: &mut Receiver<ControllerEvent>) {
    loop {
        match events.try_recv() {
            Ok(ControllerEvent::Alert { kind, message }) => {
                eprintln!("[{}] {message}", kind.as_str());
            }
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

fn print_items(items: &[Item]) {
    println!("{} item(s)", items.len());
    for item in items {
        println!("  {}", format_item(item));
    }
}

fn format_item(item: &Item) -> String {
    match item.file_url() {
        Some(url) => format!("{}  {}  {url}", item.id, item.name),
        None => format!("{}  {}", item.id, item.name),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use shared::domain::FileRef;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn add_accepts_optional_file() {
        let cli = Cli::try_parse_from(["item_list", "add", "apple", "--file", "a.png"])
            .expect("parse");
        match cli.command {
            Command::Add { name, file } => {
                assert_eq!(name, "apple");
                assert_eq!(file, Some(PathBuf::from("a.png")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn format_item_shows_file_url_when_present() {
        let plain = Item::new("A", "apple");
        let with_file =
            Item::new("B", "pear").with_file(FileRef::new("b.png", Some("http://f/b.png".into())));

        assert_eq!(format_item(&plain), "A  apple");
        assert_eq!(format_item(&with_file), "B  pear  http://f/b.png");
    }
}
