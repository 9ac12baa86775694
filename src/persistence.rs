//! This module provides on-device storage for the tasks of remote containers

use std::path::{Path, PathBuf};
use std::error::Error;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use url::form_urlencoded;

use crate::task::{Task, TaskId};
use crate::traits::Persistence;


/// What a remote container persists between two runs
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedTasks {
    pub tasks: HashMap<TaskId, Task>,
    /// Tasks whose local changes have not been acknowledged by the backend yet
    #[serde(default)]
    pub unsynced: HashSet<TaskId>,
    /// Tasks that have been deleted locally, but not on the backend yet
    #[serde(default)]
    pub deleted: HashSet<TaskId>,
    /// The most recent backend timestamp that has been pulled
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}


/// Stores each key as a JSON file in a folder
#[derive(Debug)]
pub struct FolderPersistence {
    backing_folder: PathBuf,
}

impl FolderPersistence {
    /// Use `folder` to store data. It will be created when needed.
    pub fn new(folder: &Path) -> Self {
        Self { backing_folder: PathBuf::from(folder) }
    }

    /// The file that holds the data of `key`.
    ///
    /// Keys are percent-encoded first, so that two different keys never share a file.
    pub fn file_for(&self, key: &str) -> PathBuf {
        let encoded = encode_key(key);
        let sanitized = sanitize_filename::sanitize(&encoded);
        if sanitized != encoded {
            log::warn!("Key {:?} is not a portable file name, it may share its file with another key", key);
        }
        self.backing_folder.join(format!("{}.json", sanitized))
    }
}

/// Percent-encode `key`, so that it only contains `[A-Za-z0-9_%+-]`
fn encode_key(key: &str) -> String {
    form_urlencoded::byte_serialize(key.as_bytes())
        .collect::<String>()
        // `byte_serialize` keeps these, but file systems may not
        .replace('*', "%2A")
        .replace('.', "%2E")
}

impl Persistence for FolderPersistence {
    fn load(&self, key: &str) -> Result<Option<PersistedTasks>, Box<dyn Error>> {
        let path = self.file_for(key);
        let file = match std::fs::File::open(&path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(format!("Unable to open file {:?}: {}", path, err).into());
            },
            Ok(file) => file,
        };
        let data = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(Some(data))
    }

    fn save(&self, key: &str, data: &PersistedTasks) -> Result<(), Box<dyn Error>> {
        std::fs::create_dir_all(&self.backing_folder)?;

        // Write to a sibling file first, so that a crash never leaves a truncated file
        let path = self.file_for(key);
        let tmp_path = path.with_extension("json.tmp");
        let file = std::fs::File::create(&tmp_path)
            .map_err(|err| format!("Unable to save file {:?}: {}", tmp_path, err))?;
        serde_json::to_writer(file, data)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}


/// Keeps data in memory. Data survives remote containers, but not the process
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    stored: Mutex<HashMap<String, PersistedTasks>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// The keys that have data stored
    pub fn keys(&self) -> Vec<String> {
        self.stored.lock().unwrap().keys().cloned().collect()
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self, key: &str) -> Result<Option<PersistedTasks>, Box<dyn Error>> {
        Ok(self.stored.lock().unwrap().get(key).cloned())
    }

    fn save(&self, key: &str, data: &PersistedTasks) -> Result<(), Box<dyn Error>> {
        self.stored.lock().unwrap().insert(key.to_string(), data.clone());
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> PersistedTasks {
        let mut data = PersistedTasks::default();
        let task = Task::new("shopping".to_string(), Some("user".to_string()));
        data.unsynced.insert(task.id().clone());
        data.tasks.insert(task.id().clone(), task);
        data.deleted.insert(TaskId::from("gone"));
        data.last_sync = Some(Utc::now());
        data
    }

    #[test]
    fn serde_folder_persistence() {
        let folder = tempfile::tempdir().unwrap();
        let persistence = FolderPersistence::new(&folder.path().join("nested"));

        assert_eq!(persistence.load("tasks_user").unwrap(), None);

        let data = sample_data();
        persistence.save("tasks_user", &data).unwrap();

        let retrieved = persistence.load("tasks_user").unwrap();
        assert_eq!(retrieved, Some(data));
    }

    #[test]
    fn keys_are_sanitized() {
        let persistence = FolderPersistence::new(Path::new("/some/folder"));
        let path = persistence.file_for("tasks_../../etc/passwd");
        assert_eq!(path.parent(), Some(Path::new("/some/folder")));
    }

    #[test]
    fn different_keys_use_different_files() {
        let persistence = FolderPersistence::new(Path::new("/some/folder"));
        assert_eq!(persistence.file_for("tasks_user_1"), Path::new("/some/folder/tasks_user_1.json"));

        let keys = ["tasks_ab", "tasks_a/b", "tasks_a*b", "tasks_a.", "tasks_a", "tasks_a b", "tasks_a+b", "tasks_a%2Fb"];
        let files: HashSet<PathBuf> = keys.iter().map(|key| persistence.file_for(key)).collect();
        assert_eq!(files.len(), keys.len());
    }

    #[test]
    fn users_do_not_share_data() {
        let folder = tempfile::tempdir().unwrap();
        let persistence = FolderPersistence::new(folder.path());
        let data = sample_data();
        persistence.save("tasks_a/b", &data).unwrap();

        assert_eq!(persistence.load("tasks_ab").unwrap(), None);
        assert_eq!(persistence.load("tasks_a/b").unwrap(), Some(data));
    }

    #[test]
    fn corrupted_file() {
        let folder = tempfile::tempdir().unwrap();
        let persistence = FolderPersistence::new(folder.path());
        std::fs::write(persistence.file_for("tasks_x"), "{ not json").unwrap();
        assert!(persistence.load("tasks_x").is_err());
    }

    #[test]
    fn memory_persistence() {
        let persistence = MemoryPersistence::new();
        let data = sample_data();
        persistence.save("tasks_a", &data).unwrap();
        assert_eq!(persistence.load("tasks_a").unwrap(), Some(data));
        assert_eq!(persistence.load("tasks_b").unwrap(), None);
        assert_eq!(persistence.keys(), vec!["tasks_a".to_string()]);
    }
}
