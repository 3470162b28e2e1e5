//! Shared capture of `log` records.
//!
//! `tracing` is built with `log-always`, so events emitted on spawned tasks
//! reach this logger even when no `tracing` subscriber is installed.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use logtest::Logger;
use rstest::fixture;

/// Exclusive access to the process-wide [`Logger`].
///
/// Holding the handle serialises tests that inspect log output.
pub struct LoggerHandle {
    guard: MutexGuard<'static, Logger>,
}

impl LoggerHandle {
    /// Lock the global logger, starting it on first use, and discard
    /// records left over from earlier tests.
    pub fn new() -> Self {
        static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

        let logger = LOGGER.get_or_init(|| Mutex::new(Logger::start()));
        let mut guard = logger.lock().unwrap_or_else(PoisonError::into_inner);
        while guard.pop().is_some() {}

        Self { guard }
    }

    /// Number of buffered records at `level` containing `needle`.
    /// Inspected records are consumed.
    pub fn count(&mut self, level: log::Level, needle: &str) -> usize {
        let mut matches = 0;
        while let Some(record) = self.guard.pop() {
            if record.level() == level && record.args().contains(needle) {
                matches += 1;
            }
        }
        matches
    }
}

impl Default for LoggerHandle {
    fn default() -> Self { Self::new() }
}

impl std::ops::Deref for LoggerHandle {
    type Target = Logger;

    fn deref(&self) -> &Self::Target { &self.guard }
}

impl std::ops::DerefMut for LoggerHandle {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.guard }
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn logger() -> LoggerHandle { LoggerHandle::new() }
