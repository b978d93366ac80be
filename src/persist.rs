//! Store ↔ redb persistence.
//!
//! redb is a save file: loaded on boot, flushed after every mutation.
//! Never queried at runtime — the in-memory Store is the runtime truth.

use crate::store::{Command, Priority, Store, StoreEvent, Task, TaskDraft, TaskStatus};
use chrono::{Duration, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use std::sync::Arc;

const TASKS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tasks");
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Thin handle to the redb file. Cloneable (Arc inside).
#[derive(Clone)]
pub struct SaveFile {
    db: Arc<Database>,
}

impl SaveFile {
    /// Open (or create) the save file at the given path.
    /// Creates tables if they don't exist.
    pub fn open(path: &str) -> Result<Self, SaveFileError> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(TASKS_TABLE)?;
            let _ = txn.open_table(META_TABLE)?;
        }
        txn.commit()?;

        Ok(SaveFile { db: Arc::new(db) })
    }

    /// Load the entire Store from disk. Called once at boot.
    ///
    /// redb iterates by key, which scrambles insertion order — rows are
    /// re-sorted newest-first so the collection reads the same as one
    /// built by head-insertion.
    pub fn load_store(&self) -> Result<Store, SaveFileError> {
        let mut store = Store::new();
        let txn = self.db.begin_read()?;

        let tasks_table = txn.open_table(TASKS_TABLE)?;
        for entry in tasks_table.iter()? {
            let (_, value) = entry?;
            let task: Task = postcard::from_bytes(value.value())
                .map_err(|e| SaveFileError::Decode(e.to_string()))?;
            store.tasks.push(task);
        }
        store.tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let meta_table = txn.open_table(META_TABLE)?;
        if let Some(rev_data) = meta_table.get("revision")? {
            let bytes = rev_data.value();
            if bytes.len() == 8 {
                store.revision = u64::from_le_bytes(bytes.try_into().unwrap());
            }
        }

        Ok(store)
    }

    /// Flush a single event to disk. Called after every Store::apply().
    /// Writes exactly the rows the event touched + the revision, in one
    /// transaction.
    pub fn flush(&self, store: &Store, event: &StoreEvent) -> Result<(), SaveFileError> {
        let txn = self.db.begin_write()?;
        {
            let mut tasks = txn.open_table(TASKS_TABLE)?;
            let mut meta = txn.open_table(META_TABLE)?;

            match event {
                StoreEvent::TaskCreated { task, .. }
                | StoreEvent::TaskUpdated { task, .. } => {
                    let bytes = encode_task(task)?;
                    tasks.insert(task.id.as_bytes().as_slice(), bytes.as_slice())?;
                }

                StoreEvent::TaskDeleted { task_id, .. } => {
                    tasks.remove(task_id.as_bytes().as_slice())?;
                }

                StoreEvent::TasksDeleted { task_ids, .. } => {
                    for id in task_ids {
                        tasks.remove(id.as_bytes().as_slice())?;
                    }
                }

                StoreEvent::TasksStatusChanged { task_ids, .. } => {
                    // Look up the current state in the Store and write the
                    // whole entity for each affected row.
                    for id in task_ids {
                        if let Some(task) = store.get(*id) {
                            let bytes = encode_task(task)?;
                            tasks.insert(task.id.as_bytes().as_slice(), bytes.as_slice())?;
                        }
                    }
                }
            }

            meta.insert("revision", store.revision.to_le_bytes().as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Seed a demo dataset if the store is empty. Returns how many tasks
    /// were created. This is the console's out-of-the-box sample data.
    pub fn ensure_demo_tasks(&self, store: &mut Store) -> Result<usize, SaveFileError> {
        if !store.tasks.is_empty() {
            return Ok(0);
        }

        let demo: &[(&str, &str, TaskStatus, Priority, &[&str], &[&str], Option<i64>)] = &[
            (
                "Fix login redirect loop",
                "Safari drops the session cookie on the second hop.",
                TaskStatus::InProgress,
                Priority::Urgent,
                &["alice"],
                &["bug", "auth"],
                Some(2),
            ),
            (
                "Quarterly usage report",
                "Numbers for the March review deck.",
                TaskStatus::Pending,
                Priority::High,
                &["bob", "carol"],
                &["reporting"],
                Some(7),
            ),
            (
                "Upgrade payment SDK",
                "",
                TaskStatus::Pending,
                Priority::Medium,
                &["carol"],
                &["payments", "deps"],
                Some(14),
            ),
            (
                "Archive stale feature flags",
                "Anything untouched for six months.",
                TaskStatus::Pending,
                Priority::Low,
                &["dave"],
                &["cleanup"],
                None,
            ),
            (
                "Index the search backlog",
                "Reindex after the mapping change.",
                TaskStatus::Completed,
                Priority::High,
                &["alice", "dave"],
                &["search"],
                None,
            ),
            (
                "Draft onboarding emails",
                "",
                TaskStatus::Cancelled,
                Priority::Low,
                &["bob"],
                &["growth"],
                None,
            ),
        ];

        for &(title, description, status, priority, assignees, tags, due_in_days) in demo {
            let draft = TaskDraft {
                title: title.to_string(),
                description: if description.is_empty() {
                    None
                } else {
                    Some(description.to_string())
                },
                status,
                priority,
                assignees: assignees.iter().map(|a| (*a).to_string()).collect(),
                tags: tags.iter().map(|t| (*t).to_string()).collect(),
                due_date: due_in_days.map(|d| Utc::now() + Duration::days(d)),
            };
            let event = store
                .apply(Command::Create { draft })
                .map_err(|e| SaveFileError::Seed(e.to_string()))?;
            self.flush(store, &event)?;
        }

        Ok(demo.len())
    }
}

fn encode_task(task: &Task) -> Result<Vec<u8>, SaveFileError> {
    postcard::to_allocvec(task).map_err(|e| SaveFileError::Encode(e.to_string()))
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SaveFileError {
    Redb(String),
    Decode(String),
    Encode(String),
    Seed(String),
}

// redb 2.x has many error types. Blanket them all into SaveFileError::Redb.
macro_rules! from_redb {
    ($($t:ty),*) => {
        $(impl From<$t> for SaveFileError {
            fn from(e: $t) -> Self { SaveFileError::Redb(e.to_string()) }
        })*
    };
}

from_redb!(
    redb::Error,
    redb::DatabaseError,
    redb::TableError,
    redb::TransactionError,
    redb::StorageError,
    redb::CommitError
);

impl std::fmt::Display for SaveFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveFileError::Redb(e) => write!(f, "redb: {e}"),
            SaveFileError::Decode(e) => write!(f, "decode: {e}"),
            SaveFileError::Encode(e) => write!(f, "encode: {e}"),
            SaveFileError::Seed(e) => write!(f, "seed: {e}"),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TaskPatch;
    use std::fs;
    use uuid::Uuid;

    /// Create a temp save file that auto-cleans.
    fn temp_save(name: &str) -> (SaveFile, String) {
        let path = format!("/tmp/taskdeck_test_{name}_{}.redb", std::process::id());
        let _ = fs::remove_file(&path); // clean up any leftover
        let sf = SaveFile::open(&path).unwrap();
        (sf, path)
    }

    fn cleanup(path: &str) {
        let _ = fs::remove_file(path);
    }

    fn draft(title: &str) -> TaskDraft {
        TaskDraft {
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            priority: Priority::Medium,
            assignees: vec!["alice".into()],
            tags: Vec::new(),
            due_date: None,
        }
    }

    fn create(store: &mut Store, sf: &SaveFile, title: &str) -> Uuid {
        let event = store.apply(Command::Create { draft: draft(title) }).unwrap();
        sf.flush(store, &event).unwrap();
        match event {
            StoreEvent::TaskCreated { task, .. } => task.id,
            _ => panic!("expected TaskCreated"),
        }
    }

    #[test]
    fn round_trip_empty_store() {
        let (sf, path) = temp_save("empty");

        let store = sf.load_store().unwrap();
        assert_eq!(store.tasks.len(), 0);
        assert_eq!(store.revision, 0);

        cleanup(&path);
    }

    #[test]
    fn seed_and_reload() {
        let (sf, path) = temp_save("seed");

        // Boot, seed, shut down
        let mut store = sf.load_store().unwrap();
        let seeded = sf.ensure_demo_tasks(&mut store).unwrap();
        assert!(seeded > 0);

        // Reboot — data should be there
        let store2 = sf.load_store().unwrap();
        assert_eq!(store2.tasks.len(), seeded);
        assert_eq!(store2.revision, seeded as u64);

        // Seed again — should be a no-op
        let mut store3 = sf.load_store().unwrap();
        assert_eq!(sf.ensure_demo_tasks(&mut store3).unwrap(), 0);

        cleanup(&path);
    }

    #[test]
    fn flush_and_reload_mutations() {
        let (sf, path) = temp_save("mutations");

        let mut store = sf.load_store().unwrap();
        let id = create(&mut store, &sf, "Persisted task");

        let patch = TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..TaskPatch::default()
        };
        let event = store.apply(Command::Update { task_id: id, patch }).unwrap();
        sf.flush(&store, &event).unwrap();

        // Reboot — task should be in the updated state
        let store2 = sf.load_store().unwrap();
        assert_eq!(store2.revision, 2);
        assert_eq!(store2.tasks.len(), 1);
        let task = store2.get(id).unwrap();
        assert_eq!(task.title, "Persisted task");
        assert_eq!(task.status, TaskStatus::InProgress);

        cleanup(&path);
    }

    #[test]
    fn delete_removes_row_from_disk() {
        let (sf, path) = temp_save("delete");

        let mut store = sf.load_store().unwrap();
        let id = create(&mut store, &sf, "Doomed");

        let event = store.apply(Command::Delete { task_id: id }).unwrap();
        sf.flush(&store, &event).unwrap();

        let store2 = sf.load_store().unwrap();
        assert_eq!(store2.tasks.len(), 0);
        assert_eq!(store2.revision, 2);

        cleanup(&path);
    }

    #[test]
    fn batch_events_flush_every_affected_row() {
        let (sf, path) = temp_save("batch");

        let mut store = sf.load_store().unwrap();
        let a = create(&mut store, &sf, "a");
        let b = create(&mut store, &sf, "b");
        let c = create(&mut store, &sf, "c");

        let event = store
            .apply(Command::BatchSetStatus {
                task_ids: vec![a, b],
                status: TaskStatus::Completed,
            })
            .unwrap();
        sf.flush(&store, &event).unwrap();

        let event = store.apply(Command::BatchDelete { task_ids: vec![c] }).unwrap();
        sf.flush(&store, &event).unwrap();

        let store2 = sf.load_store().unwrap();
        assert_eq!(store2.tasks.len(), 2);
        assert_eq!(store2.get(a).unwrap().status, TaskStatus::Completed);
        assert_eq!(store2.get(b).unwrap().status, TaskStatus::Completed);
        assert!(store2.get(c).is_none());

        cleanup(&path);
    }

    #[test]
    fn reload_orders_newest_first() {
        let (sf, path) = temp_save("order");

        let mut store = sf.load_store().unwrap();
        create(&mut store, &sf, "oldest");
        std::thread::sleep(std::time::Duration::from_millis(2));
        create(&mut store, &sf, "newest");

        let store2 = sf.load_store().unwrap();
        assert_eq!(store2.tasks[0].title, "newest");
        assert_eq!(store2.tasks[1].title, "oldest");

        cleanup(&path);
    }
}
