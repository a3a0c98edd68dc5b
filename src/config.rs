// Copyright (c) 2024-present, tidemark-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Store;

/// Store configuration
///
/// Transactions inherit the configuration of the backend they are opened on.
#[derive(Clone, Debug)]
pub struct Config {
    /// Fan out snapshot captures on the rayon thread pool
    ///
    /// Only has an effect if the `parallel` feature is enabled.
    ///
    /// Defaults to `true`
    pub(crate) parallel_capture: bool,

    /// Minimum amount of registered snapshots before a commit
    /// fans out its captures
    ///
    /// Defaults to 4
    pub(crate) parallel_capture_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parallel_capture: true,
            parallel_capture_threshold: 4,
        }
    }
}

impl Config {
    /// Initializes a new config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables parallel capture (default: enabled)
    ///
    /// If disabled, every snapshot captures on the committing thread.
    #[must_use]
    pub fn parallel_capture(mut self, enabled: bool) -> Self {
        self.parallel_capture = enabled;
        self
    }

    /// Sets the minimum amount of snapshots for parallel capture (default: 4)
    ///
    /// # Panics
    ///
    /// Panics if the threshold is 0.
    #[must_use]
    pub fn parallel_capture_threshold(mut self, threshold: usize) -> Self {
        assert!(threshold > 0);

        self.parallel_capture_threshold = threshold;
        self
    }

    /// Opens an empty store using the config
    #[must_use]
    pub fn open(self) -> Store {
        Store::open(self)
    }

    #[cfg(feature = "parallel")]
    pub(crate) fn should_fan_out(&self, snapshot_count: usize) -> bool {
        self.parallel_capture && snapshot_count >= self.parallel_capture_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert!(config.parallel_capture);
        assert_eq!(4, config.parallel_capture_threshold);
    }

    #[test]
    #[should_panic]
    fn config_zero_threshold() {
        let _ = Config::new().parallel_capture_threshold(0);
    }

    #[test]
    #[cfg(feature = "parallel")]
    fn config_fan_out() {
        let config = Config::new().parallel_capture_threshold(2);
        assert!(!config.should_fan_out(1));
        assert!(config.should_fan_out(2));

        let config = config.parallel_capture(false);
        assert!(!config.should_fan_out(100));
    }
}
