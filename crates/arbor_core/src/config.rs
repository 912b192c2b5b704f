//! Arbor configuration.

use std::time::Duration;

/// Configuration for a [`crate::Context`].
#[derive(Debug, Clone)]
pub struct ArborConfig {
    /// Schema version tag that prefixes every collection path.
    pub version: String,

    /// Joint deadline for the uploads of one save.
    pub upload_timeout: Duration,

    /// Deadline for resolving one data source page.
    pub fetch_timeout: Duration,

    /// Default data source page size.
    pub page_size: usize,

    /// Whether single-entity reads go through the snapshot cache.
    pub cache_snapshots: bool,

    /// Most snapshots the cache holds before evicting the least recently
    /// read one.
    pub cache_capacity: usize,

    /// Default size cap for file downloads, in bytes.
    pub max_download_size: u64,

    /// Path of the store's online flag.
    pub connectivity_path: String,
}

impl Default for ArborConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            upload_timeout: Duration::from_secs(20),
            fetch_timeout: Duration::from_secs(20),
            page_size: 30,
            cache_snapshots: true,
            cache_capacity: 256,
            max_download_size: 10 * 1024 * 1024, // 10 MiB
            connectivity_path: ".info/connected".to_string(),
        }
    }
}

impl ArborConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the schema version tag.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the joint upload deadline.
    #[must_use]
    pub const fn upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    /// Sets the page resolution deadline.
    #[must_use]
    pub const fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets the default page size.
    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Enables or disables the snapshot cache.
    #[must_use]
    pub const fn cache_snapshots(mut self, value: bool) -> Self {
        self.cache_snapshots = value;
        self
    }

    /// Sets the snapshot cache capacity. Zero is treated as one.
    #[must_use]
    pub const fn cache_capacity(mut self, entries: usize) -> Self {
        self.cache_capacity = entries;
        self
    }

    /// Sets the default download size cap.
    #[must_use]
    pub const fn max_download_size(mut self, bytes: u64) -> Self {
        self.max_download_size = bytes;
        self
    }

    /// Sets the connectivity flag path.
    #[must_use]
    pub fn connectivity_path(mut self, path: impl Into<String>) -> Self {
        self.connectivity_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ArborConfig::default();
        assert_eq!(config.version, "v1");
        assert_eq!(config.upload_timeout, Duration::from_secs(20));
        assert_eq!(config.page_size, 30);
        assert!(config.cache_snapshots);
        assert_eq!(config.cache_capacity, 256);
        assert_eq!(config.connectivity_path, ".info/connected");
    }

    #[test]
    fn builder_pattern() {
        let config = ArborConfig::new()
            .version("v2")
            .page_size(10)
            .upload_timeout(Duration::from_millis(1))
            .cache_snapshots(false)
            .cache_capacity(8);

        assert_eq!(config.version, "v2");
        assert_eq!(config.page_size, 10);
        assert_eq!(config.upload_timeout, Duration::from_millis(1));
        assert!(!config.cache_snapshots);
        assert_eq!(config.cache_capacity, 8);
    }
}
