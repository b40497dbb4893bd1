//! Fault injection for testing crash safety
//!
//! File operations on the persistence, backup and restore paths call
//! [`FaultInjector::check`] with a named point before touching the disk. An
//! armed point turns into an I/O error at that exact step, which lets tests
//! drive every recovery branch against a real filesystem.
//!
//! Points are armed per injector instance, or process-wide through the
//! `DIRSCHEMA_FAULT_POINT` environment variable for injectors built with
//! [`FaultInjector::from_env`].
//!
//! ```bash
//! DIRSCHEMA_FAULT_POINT=persist_write_file dirschema add ...
//! ```

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

/// Environment variable naming a fault point to arm.
pub const FAULT_POINT_ENV: &str = "DIRSCHEMA_FAULT_POINT";

static ENV_FAULT_POINT: OnceLock<Option<String>> = OnceLock::new();

fn env_fault_point() -> Option<&'static str> {
    ENV_FAULT_POINT
        .get_or_init(|| std::env::var(FAULT_POINT_ENV).ok())
        .as_deref()
}

/// Set of armed fault points shared by clones of the injector.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    armed: Arc<Mutex<HashSet<String>>>,
    honor_env: bool,
}

impl FaultInjector {
    /// Injector with nothing armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Injector that also fires the point named by `DIRSCHEMA_FAULT_POINT`.
    pub fn from_env() -> Self {
        Self {
            honor_env: true,
            ..Self::default()
        }
    }

    pub fn arm(&self, point: &str) {
        self.armed.lock().insert(point.to_string());
    }

    pub fn disarm(&self, point: &str) {
        self.armed.lock().remove(point);
    }

    pub fn clear(&self) {
        self.armed.lock().clear();
    }

    pub fn is_armed(&self, point: &str) -> bool {
        if self.honor_env && env_fault_point() == Some(point) {
            return true;
        }
        self.armed.lock().contains(point)
    }

    /// Fails with an I/O error if `point` is armed.
    pub fn check(&self, point: &str) -> io::Result<()> {
        if self.is_armed(point) {
            tracing::warn!(fault_point = point, "injected fault triggered");
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected fault at '{}'", point),
            ));
        }
        Ok(())
    }
}

/// All defined fault point names
pub mod points {
    // Schema file persistence
    pub const PERSIST_SNAPSHOT_COPY: &str = "persist_snapshot_copy";
    pub const PERSIST_WRITE_FILE: &str = "persist_write_file";
    pub const PERSIST_SYNC: &str = "persist_sync";
    pub const PERSIST_RESTORE_FILE: &str = "persist_restore_file";

    // Concatenated schema snapshot
    pub const CONCAT_WRITE: &str = "concat_write";

    // Backup / restore
    pub const BACKUP_WRITE_ARCHIVE: &str = "backup_write_archive";
    pub const RESTORE_WRITE_FILE: &str = "restore_write_file";

    pub fn all() -> &'static [&'static str] {
        &[
            PERSIST_SNAPSHOT_COPY,
            PERSIST_WRITE_FILE,
            PERSIST_SYNC,
            PERSIST_RESTORE_FILE,
            CONCAT_WRITE,
            BACKUP_WRITE_ARCHIVE,
            RESTORE_WRITE_FILE,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_armed_by_default() {
        let faults = FaultInjector::new();
        for point in points::all() {
            assert!(faults.check(point).is_ok());
        }
    }

    #[test]
    fn test_armed_point_fails_until_disarmed() {
        let faults = FaultInjector::new();
        faults.arm(points::PERSIST_WRITE_FILE);

        let err = faults.check(points::PERSIST_WRITE_FILE).unwrap_err();
        assert!(err.to_string().contains("persist_write_file"));
        assert!(faults.check(points::PERSIST_SYNC).is_ok());

        faults.disarm(points::PERSIST_WRITE_FILE);
        assert!(faults.check(points::PERSIST_WRITE_FILE).is_ok());
    }

    #[test]
    fn test_clones_share_armed_points() {
        let faults = FaultInjector::new();
        let clone = faults.clone();
        faults.arm(points::CONCAT_WRITE);
        assert!(clone.is_armed(points::CONCAT_WRITE));
        clone.clear();
        assert!(!faults.is_armed(points::CONCAT_WRITE));
    }

    #[test]
    fn test_point_names_are_lowercase_with_underscores() {
        for point in points::all() {
            assert!(point.chars().all(|c| c.is_lowercase() || c == '_'));
        }
    }
}
