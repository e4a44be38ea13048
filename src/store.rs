//! Flat-file member store
//!
//! Two JSON files back the bot's state:
//! - the known-members list (`[123, 456]`), append-only
//! - the departures map (`{"123": {"count": 1, "first_sent_at": .., "last_sent_at": ..}}`)
//!
//! Missing or unreadable files load as their empty default. Writes replace the
//! whole file through a temp file and a rename.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cadence::DepartureRecord;
use crate::error::{Error, Result};

pub type MemberId = i64;
pub type DepartureMap = BTreeMap<MemberId, DepartureRecord>;

pub const KNOWN_MEMBERS_FILE: &str = "joined_users.json";
pub const DEPARTURES_FILE: &str = "left_users.json";
pub const LOCK_FILE: &str = "channel_keeper.lock";

/// Locations of the store files.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub known_members: PathBuf,
    pub departures: PathBuf,
    pub lock: PathBuf,
}

impl StorePaths {
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            known_members: dir.join(KNOWN_MEMBERS_FILE),
            departures: dir.join(DEPARTURES_FILE),
            lock: dir.join(LOCK_FILE),
        }
    }
}

impl Default for StorePaths {
    fn default() -> Self {
        Self::in_dir(".")
    }
}

/// Read a JSON file, falling back to `T::default()` when the file is absent,
/// empty or does not parse.
pub async fn load_json<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), "Failed to read store file: {}", err);
            }
            return T::default();
        }
    };

    if content.trim().is_empty() {
        return T::default();
    }

    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(err) => {
            warn!(path = %path.display(), "Store file is malformed, using empty default: {}", err);
            T::default()
        }
    }
}

/// Serialize `value` and replace the file with it.
pub async fn save_json<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let content = serde_json::to_string(value)?;
    let tmp = tmp_path(path);

    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "Store file saved");
    Ok(())
}

/// Create the file with `default` only if it does not exist yet.
///
/// Returns `true` when the file was created. An existing file is never
/// touched, even if its content is invalid.
pub async fn ensure_exists<T>(path: &Path, default: &T) -> Result<bool>
where
    T: Serialize + ?Sized,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let content = serde_json::to_string(default)?;
    let file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await;

    match file {
        Ok(_) => {
            fs::write(path, content).await?;
            info!(path = %path.display(), "Created store file");
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn dedup_preserving_order(ids: Vec<MemberId>) -> Vec<MemberId> {
    let mut out: Vec<MemberId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[derive(Debug, Default)]
struct StoreState {
    known_members: Vec<MemberId>,
    departures: DepartureMap,
}

/// Known members and departure records behind a single lock.
///
/// Every mutation of either table goes through the same mutex, so event
/// handlers and the reconciler never overwrite each other's changes.
#[derive(Debug)]
pub struct MemberStore {
    paths: StorePaths,
    state: Mutex<StoreState>,
}

impl MemberStore {
    /// Bootstrap missing files and load both tables.
    pub async fn open(paths: StorePaths) -> Result<Self> {
        ensure_exists(&paths.known_members, &Vec::<MemberId>::new()).await?;
        ensure_exists(&paths.departures, &DepartureMap::new()).await?;

        let known_members: Vec<MemberId> = load_json(&paths.known_members).await;
        let departures: DepartureMap = load_json(&paths.departures).await;

        info!(
            known = known_members.len(),
            departed = departures.len(),
            "Member store loaded"
        );

        Ok(Self {
            paths,
            state: Mutex::new(StoreState {
                known_members: dedup_preserving_order(known_members),
                departures,
            }),
        })
    }

    /// Snapshot of the known-members set in insertion order.
    pub async fn known_members(&self) -> Vec<MemberId> {
        self.state.lock().await.known_members.clone()
    }

    pub async fn known_count(&self) -> usize {
        self.state.lock().await.known_members.len()
    }

    pub async fn is_known(&self, id: MemberId) -> bool {
        self.state.lock().await.known_members.contains(&id)
    }

    /// Add a member to the known set and persist it. Returns `false` if the
    /// member was already known.
    pub async fn record_member(&self, id: MemberId) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.known_members.contains(&id) {
            return Ok(false);
        }
        state.known_members.push(id);
        save_json(&self.paths.known_members, &state.known_members).await?;
        info!(user_id = id, "Saved member");
        Ok(true)
    }

    pub async fn departure(&self, id: MemberId) -> Option<DepartureRecord> {
        self.state.lock().await.departures.get(&id).copied()
    }

    /// Snapshot of the whole departures map.
    pub async fn departures(&self) -> DepartureMap {
        self.state.lock().await.departures.clone()
    }

    /// Atomically compute the record for `id` from its current value and store
    /// it in memory. Returns the stored record.
    pub async fn upsert_departure<F>(&self, id: MemberId, f: F) -> DepartureRecord
    where
        F: FnOnce(Option<DepartureRecord>) -> DepartureRecord,
    {
        let mut state = self.state.lock().await;
        let record = f(state.departures.get(&id).copied());
        state.departures.insert(id, record);
        record
    }

    /// Modify the record for `id` in memory if it still exists. Returns the
    /// updated record, or `None` when it was removed in the meantime.
    pub async fn update_departure<F>(&self, id: MemberId, f: F) -> Option<DepartureRecord>
    where
        F: FnOnce(&mut DepartureRecord),
    {
        let mut state = self.state.lock().await;
        let record = state.departures.get_mut(&id)?;
        f(record);
        Some(*record)
    }

    /// Drop a departure record in memory. Persisted by [`Self::flush_departures`].
    pub async fn remove_departure(&self, id: MemberId) -> Option<DepartureRecord> {
        self.state.lock().await.departures.remove(&id)
    }

    /// Drop a departure record and persist the map right away if it existed.
    pub async fn clear_departure(&self, id: MemberId) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.departures.remove(&id).is_none() {
            return Ok(false);
        }
        save_json(&self.paths.departures, &state.departures).await?;
        Ok(true)
    }

    /// Write the full departures map.
    pub async fn flush_departures(&self) -> Result<()> {
        let state = self.state.lock().await;
        save_json(&self.paths.departures, &state.departures).await
    }
}

/// Exclusive lock guard that keeps a second bot process off the same store.
pub struct StoreLock {
    lock_file: Option<File>,
    path: PathBuf,
}

impl StoreLock {
    /// Acquire an exclusive lock on the store.
    pub fn acquire(path: &Path) -> Result<Self> {
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::LockError(format!("Failed to open lock file: {}", e)))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                lock_file: Some(lock_file),
                path: path.to_path_buf(),
            }),
            Err(_) => {
                warn!(path = %path.display(), "Store is already in use by another process");
                Err(Error::StoreLocked)
            }
        }
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(ref file) = self.lock_file {
            let _ = file.unlock();
        }
        if self.lock_file.take().is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        self.release();
    }
}
