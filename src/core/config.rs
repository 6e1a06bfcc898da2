use std::path::PathBuf;
use std::time::Duration;

/// Which disk-write policy a mutation triggers. At most one is active; see
/// [`Config::transaction_save`] / [`Config::no_saves`] / [`Config::background_save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Every successful mutation synchronously flushes its collection.
    TransactionSave,
    /// Mutations only mark the collection dirty; a ticking background
    /// worker flushes dirty collections at `interval`.
    BackgroundSave,
    /// Mutations only mark the collection dirty; nothing is written until an
    /// explicit shutdown-time save.
    NoSaves,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for per-collection files (`<data_dir>/collections/<name>.godb`).
    pub data_dir: PathBuf,

    /// Approximate memory budget in megabytes, translated into an LRU cache
    /// capacity via the coarse `/100`-per-collection estimate from §6.
    pub max_memory_mb: usize,

    pub save_mode: SaveMode,

    /// Tick interval for the background-save worker; only consulted when
    /// `save_mode == SaveMode::BackgroundSave`.
    pub background_save_interval: Duration,

    /// Initial shard-count hint for the per-document lock table.
    pub max_readers: usize,

    /// Capacity of the asynchronous dual-write retry queue.
    pub retry_queue_capacity: usize,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Config {
            data_dir: data_dir.into(),
            ..Config::default()
        }
    }

    /// Enables dual-write (the default): every mutation synchronously
    /// flushes its collection.
    pub fn transaction_save(mut self, enabled: bool) -> Self {
        if enabled {
            self.save_mode = SaveMode::TransactionSave;
        } else if self.save_mode == SaveMode::TransactionSave {
            self.save_mode = SaveMode::NoSaves;
        }
        self
    }

    /// Enables the background-save worker at the given tick interval.
    pub fn background_save(mut self, interval: Duration) -> Self {
        self.save_mode = SaveMode::BackgroundSave;
        self.background_save_interval = interval;
        self
    }

    /// Disables all automatic disk writes; persistence only happens at an
    /// explicit shutdown-time save.
    pub fn no_saves(mut self, enabled: bool) -> Self {
        if enabled {
            self.save_mode = SaveMode::NoSaves;
        }
        self
    }

    pub fn max_memory_mb(mut self, mb: usize) -> Self {
        self.max_memory_mb = mb;
        self
    }

    /// Coarse per-collection memory estimate: `max_memory_mb / 100`, i.e. a
    /// budgeted 100MB per loaded collection. Capacity 0 means every insert
    /// is immediately evicted.
    pub fn cache_capacity(&self) -> usize {
        self.max_memory_mb / 100
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("./data"),
            max_memory_mb: 1000,
            save_mode: SaveMode::TransactionSave,
            background_save_interval: Duration::from_secs(30),
            max_readers: num_cpus::get(),
            retry_queue_capacity: 1024,
        }
    }
}
