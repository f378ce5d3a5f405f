use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use phototodo::auth::{AuthClient, HttpAuthClient, StaticAuthClient};
use phototodo::config::CloudConfig;
use phototodo::models::Attachment;
use phototodo::records::{HttpRecordStore, MemoryRecordStore, RecordStore};
use phototodo::storage::{BlobStore, HttpBlobStore, MemoryBlobStore};
use phototodo::view::TodoListView;

const HELP: &str = "commands:
  ls                      show the current list
  add <content>           create a todo
  attach <file> <content> create a todo with an image attachment
  rm <n>                  delete the n-th listed todo (and its image)
  signout                 sign out and exit
  quit                    exit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "phototodo=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let offline = std::env::var("TODO_OFFLINE").is_ok();

    let (auth, records, blobs): (Arc<dyn AuthClient>, Arc<dyn RecordStore>, Arc<dyn BlobStore>) =
        if offline {
            info!("TODO_OFFLINE set, using in-memory backends");
            (
                Arc::new(StaticAuthClient::new("offline-user", "offline@localhost")),
                Arc::new(MemoryRecordStore::new()),
                Arc::new(MemoryBlobStore::new()),
            )
        } else {
            let config = CloudConfig::new_from_env()?;
            (
                Arc::new(HttpAuthClient::new(config.clone())?),
                Arc::new(HttpRecordStore::new(config.clone())?),
                Arc::new(HttpBlobStore::new(config)?),
            )
        };

    let session = auth.current_session().await?;
    info!("signed in as {} ({})", session.login_id, session.user_id);

    let view = TodoListView::new(records, blobs, session.user_id.clone());
    let _subscription = view.start();
    let visible = view.watch();

    println!("{}'s todos", session.login_id);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        let (command, rest) = match line.split_once(' ') {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "help" => println!("{}", HELP),
            "ls" => {
                let items = visible.borrow().clone();
                if items.is_empty() {
                    println!("(no todos)");
                }
                for (i, item) in items.iter().enumerate() {
                    if item.image_url.is_empty() {
                        println!("{:>3}  {}", i, item.todo.content);
                    } else {
                        println!("{:>3}  {}  [image: {}]", i, item.todo.content, item.image_url);
                    }
                }
            }
            "add" => match view.create_todo(rest, None).await {
                Ok(todo) => println!("created {}", todo.id),
                Err(e) => println!("error: {}", e),
            },
            "attach" => {
                let Some((file, content)) = rest.split_once(' ') else {
                    println!("usage: attach <file> <content>");
                    continue;
                };
                match read_attachment(file).await {
                    Ok(attachment) => match view.create_todo(content, Some(attachment)).await {
                        Ok(todo) => println!("created {}", todo.id),
                        Err(e) => println!("error: {}", e),
                    },
                    Err(e) => println!("error: {}", e),
                }
            }
            "rm" => {
                let picked = rest
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| visible.borrow().get(n).map(|item| item.todo.clone()));
                match picked {
                    Some(todo) => match view.delete_todo(&todo).await {
                        Ok(()) => println!("deleted {}", todo.id),
                        Err(e) => println!("error: {}", e),
                    },
                    None => println!("usage: rm <n> (see ls)"),
                }
            }
            "signout" => {
                if let Err(e) = auth.sign_out().await {
                    println!("error: {}", e);
                }
                break;
            }
            "quit" | "exit" => break,
            other => println!("unknown command: {} (try help)", other),
        }
    }

    Ok(())
}

async fn read_attachment(path: &str) -> Result<Attachment, std::io::Error> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    Ok(Attachment { file_name, bytes })
}
