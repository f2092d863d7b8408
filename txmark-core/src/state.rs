//! Persisted state: registry, oracle and payout wallets in one JSON document.
//!
//! Every save bumps a generation counter. A snapshot only overwrites the file
//! it was loaded from if nobody saved in between, so two processes working on
//! the same file cannot silently drop each other's mutations.

use std::{
    ffi::OsString,
    fs::{self, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::Result, events::EventBus, oracle::Oracle, registry::Registry, treasury::Wallets,
    MarketError,
};

const LOCK_ATTEMPTS: u32 = 40;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Number of saves that produced this state
    #[serde(default)]
    generation: u64,
    pub registry: Registry,
    pub oracle: Oracle,
    #[serde(default)]
    pub wallets: Wallets,
}

#[derive(Deserialize)]
struct GenerationOnly {
    #[serde(default)]
    generation: u64,
}

/// Exclusive claim on a state file, released on drop.
struct StateLock {
    path: PathBuf,
}

impl StateLock {
    fn acquire(state_path: &Path) -> Result<Self> {
        let path = PathBuf::from(sibling(state_path, ".lock"));
        for attempt in 1..=LOCK_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), attempt, "state file locked, waiting");
                    thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(err) => return Err(err.into()),
            }
        }
        warn!(path = %path.display(), "gave up waiting for state lock");
        Err(MarketError::StateLocked(format!(
            "{} is held by another writer (remove it if no txmark process is running)",
            path.display()
        )))
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn sibling(path: &Path, suffix: &str) -> OsString {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    name
}

impl Snapshot {
    pub fn new(registry: Registry, oracle: Oracle) -> Self {
        Self {
            generation: 0,
            registry,
            oracle,
            wallets: Wallets::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Share one bus between registry and oracle.
    pub fn attach_event_bus(&mut self, bus: EventBus) {
        self.registry.attach_event_bus(bus.clone());
        self.oracle.attach_event_bus(bus);
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a snapshot and attach a fresh event bus to it.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut snapshot: Snapshot = serde_json::from_str(json)?;
        snapshot.attach_event_bus(EventBus::default());
        Ok(snapshot)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading snapshot");
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Write the snapshot over `path`.
    ///
    /// Holds `<path>.lock` for the duration, refuses with `StaleSnapshot` when
    /// the file on disk is not the generation this snapshot was loaded at, and
    /// replaces the file through a uniquely named temp file + rename.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let _lock = StateLock::acquire(path)?;

        match fs::read_to_string(path) {
            Ok(existing) => {
                let on_disk = serde_json::from_str::<GenerationOnly>(&existing)?.generation;
                if on_disk != self.generation {
                    warn!(path = %path.display(), loaded = self.generation, on_disk, "refusing to overwrite newer state");
                    return Err(MarketError::StaleSnapshot {
                        loaded: self.generation,
                        on_disk,
                    });
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        self.generation += 1;
        if let Err(err) = self.write_atomically(path) {
            self.generation -= 1;
            return Err(err);
        }
        debug!(path = %path.display(), generation = self.generation, "snapshot saved");
        Ok(())
    }

    fn write_atomically(&self, path: &Path) -> Result<()> {
        let tmp = sibling(path, &format!(".{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, self.to_json()?)?;
        if let Err(err) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.registry.event_bus()
    }
}
