//! An interactive demo of a task store.
//!
//! The backend is configured with the `TASKS_BACKEND_URL` and `TASKS_BACKEND_ANON_KEY` environment variables
//! (and `TASKS_BACKEND_TOKEN` for a user token). Pass `--mock` to use an in-memory backend instead.

use std::io::{stdin, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use synced_tasks::client::Client;
use synced_tasks::config::{BackendConfig, SyncSettings};
use synced_tasks::mock_backend::MockBackend;
use synced_tasks::persistence::FolderPersistence;
use synced_tasks::traits::TaskBackend;
use synced_tasks::utils::{print_task_list, prompt};
use synced_tasks::{TaskId, TaskStore};

const DEFAULT_DATA_FOLDER: &str = "tasks_data";

const HELP: &str = "Commands:
  add <text>       add a task
  toggle <id>      toggle the completion of a task
  delete <id>      delete a task
  list             list the tasks of the active store
  signin <user>    enable sync for a user
  signout          disable sync
  sync             send every synced task again
  status           show the sync status
  quit";


fn connect(use_mock: bool) -> Option<Arc<dyn TaskBackend>> {
    if use_mock {
        return Some(Arc::new(MockBackend::new()));
    }

    match BackendConfig::from_env() {
        Err(err) => {
            log::error!("{}. Tasks will not be synced.", err);
            None
        },
        Ok(config) => {
            let token_source = || async { std::env::var("TASKS_BACKEND_TOKEN").ok() };
            let client = Client::new(&config)
                .with_token_source(Arc::new(token_source));
            Some(Arc::new(client))
        },
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let use_mock = args.iter().any(|a| a == "--mock");
    let data_folder = args.iter()
        .position(|a| a == "--data")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_FOLDER));

    let connection = connect(use_mock);
    let persistence = Arc::new(FolderPersistence::new(&data_folder));
    let mut store = TaskStore::new(persistence, SyncSettings::default());

    println!("{}", HELP);
    let stdin = stdin();
    loop {
        prompt("> ");
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {},
        }
        let line = line.trim();
        let (command, argument) = match line.find(' ') {
            Some(i) => (&line[..i], line[i + 1..].trim()),
            None => (line, ""),
        };

        match command {
            "" => continue,
            "add" => match store.add_task(argument) {
                Some(id) => println!("Added {}", id),
                None => println!("A task needs a text"),
            },
            "toggle" => {
                if store.toggle_done(&TaskId::from(argument)) == false {
                    println!("No such task");
                }
            },
            "delete" => {
                if store.delete_task(&TaskId::from(argument)) == false {
                    println!("No such task");
                }
            },
            "list" => print_task_list(&store.get_tasks_array()),
            "signin" => {
                store.enable_sync(connection.clone(), argument);
                if store.is_sync_enabled() == false {
                    println!("Sync is not available");
                }
            },
            "signout" => store.disable_sync(),
            "sync" => store.sync_tasks_now(),
            "status" => {
                match store.sync_events() {
                    None => println!("Local tasks (not synced)"),
                    Some(events) => println!("Synced as {}: {} ({} pending write(s))",
                        store.current_user_id().unwrap_or_default(),
                        *events.borrow(),
                        store.pending_writes()),
                }
            },
            "quit" | "exit" => break,
            _ => println!("{}", HELP),
        }
    }

    if store.pending_writes() > 0 {
        println!("Some changes have not been synced yet. They will be sent next time.");
    }
}
