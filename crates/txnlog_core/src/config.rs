//! Log configuration.

/// Configuration for opening a log.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to fsync the active file on every commit (safer but slower).
    ///
    /// Commits are flushed to the OS either way; disabling this only drops
    /// the durability guarantee across power loss, not across process
    /// crashes.
    pub sync_on_commit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether commits fsync the active file.
    #[must_use]
    pub fn sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }
}
