//! Support for library configuration options

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitflags::bitflags;
use once_cell::sync::Lazy;
use url::Url;

/// Product name sent in the `User-Agent` header of backend requests.
/// Feel free to override it when initing this library.
pub static PRODUCT_NAME: Lazy<Arc<Mutex<String>>> = Lazy::new(|| Arc::new(Mutex::new("synced-tasks".to_string())));

/// Environment variable that holds the backend URL
pub const BACKEND_URL_VAR: &str = "TASKS_BACKEND_URL";
/// Environment variable that holds the backend anonymous (public) key
pub const BACKEND_ANON_KEY_VAR: &str = "TASKS_BACKEND_ANON_KEY";

/// The backend collection (table) that holds tasks
pub const TASKS_COLLECTION: &str = "tasks";

bitflags! {
    /// The kinds of operations a remote container is allowed to sync with its backend
    pub struct SyncActions: u8 {
        /// Pull rows from the backend
        const READ = 1;
        /// Push locally created rows
        const CREATE = 2;
        /// Push local changes of existing rows
        const UPDATE = 4;
        /// Push local deletions
        const DELETE = 8;
    }
}

impl Default for SyncActions {
    fn default() -> Self {
        Self::all()
    }
}


/// How remote containers sync with their backend
#[derive(Clone, Debug, PartialEq)]
pub struct SyncSettings {
    pub actions: SyncActions,
    /// Whether the backend is polled for changes after the initial pull
    pub realtime: bool,
    /// Delay between two polls, when `realtime` is set
    pub poll_interval: Duration,
    /// Delay before a failed sync is retried. There is no limit in the number of retries.
    pub retry_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            actions: SyncActions::default(),
            realtime: true,
            poll_interval: Duration::from_secs(5),
            retry_interval: Duration::from_secs(2),
        }
    }
}

/// Returns the key under which the tasks of a given user are persisted on-device
pub fn persistence_key(user_id: &str) -> String {
    format!("tasks_{}", user_id)
}


/// Where the hosted backend lives
#[derive(Clone, Debug, PartialEq)]
pub struct BackendConfig {
    pub url: Url,
    pub anon_key: String,
    /// Name of the backend collection (table) that holds tasks
    pub collection: String,
}

impl BackendConfig {
    /// Read the backend config from the [`BACKEND_URL_VAR`] and [`BACKEND_ANON_KEY_VAR`] environment variables
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        Self::from_values(
            std::env::var(BACKEND_URL_VAR).ok(),
            std::env::var(BACKEND_ANON_KEY_VAR).ok(),
        )
    }

    /// Build a config out of optional values. Empty values are considered missing
    pub fn from_values(url: Option<String>, anon_key: Option<String>) -> Result<Self, Box<dyn Error>> {
        let url = url.filter(|u| u.trim().is_empty() == false);
        let anon_key = anon_key.filter(|k| k.trim().is_empty() == false);

        match (url, anon_key) {
            (Some(url), Some(anon_key)) => {
                let url = Url::parse(url.trim())?;
                Ok(Self { url, anon_key, collection: TASKS_COLLECTION.to_string() })
            },
            _ => Err(format!("Backend URL or anon key is missing (set {} and {})", BACKEND_URL_VAR, BACKEND_ANON_KEY_VAR).into()),
        }
    }
}
