//! Observable schema events
//!
//! Every log line emitted by the schema subsystem carries an `event` field
//! whose value comes from [`Event::as_str`].

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    ServerStartBegin,
    ServerStartComplete,
    ConfigLoaded,
    SchemaLoaded,
    SchemaLoadFailed,

    // Modify operations
    ModifyReceived,
    ModifyStateChanged,
    ModifyRejected,
    ModifyApplied,
    ModifyComplete,

    // File persistence
    PersistBegin,
    PersistCatchUp,
    PersistStateChanged,
    PersistCommitted,
    PersistFailed,
    PersistCleanupFailed,

    // Concatenated snapshot
    ConcatWritten,
    ConcatWriteFailed,
    ConcatDiffFailed,
    OfflineChangesDetected,

    // Backup
    BackupBegin,
    BackupComplete,
    BackupFailed,
    BackupRemoved,

    // Restore
    RestoreBegin,
    RestoreComplete,
    RestoreFailed,
    VerifyComplete,

    /// Operator action required
    OperatorAlert,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ServerStartBegin => "SCHEMA_SERVER_START_BEGIN",
            Event::ServerStartComplete => "SCHEMA_SERVER_START_COMPLETE",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::SchemaLoaded => "SCHEMA_LOADED",
            Event::SchemaLoadFailed => "SCHEMA_LOAD_FAILED",

            Event::ModifyReceived => "SCHEMA_MODIFY_RECEIVED",
            Event::ModifyStateChanged => "SCHEMA_MODIFY_STATE",
            Event::ModifyRejected => "SCHEMA_MODIFY_REJECTED",
            Event::ModifyApplied => "SCHEMA_MODIFY_APPLIED",
            Event::ModifyComplete => "SCHEMA_MODIFY_COMPLETE",

            Event::PersistBegin => "SCHEMA_PERSIST_BEGIN",
            Event::PersistCatchUp => "SCHEMA_PERSIST_CATCH_UP",
            Event::PersistStateChanged => "SCHEMA_PERSIST_STATE",
            Event::PersistCommitted => "SCHEMA_PERSIST_COMMITTED",
            Event::PersistFailed => "SCHEMA_PERSIST_FAILED",
            Event::PersistCleanupFailed => "SCHEMA_PERSIST_CLEANUP_FAILED",

            Event::ConcatWritten => "CONCAT_SCHEMA_WRITTEN",
            Event::ConcatWriteFailed => "CONCAT_SCHEMA_WRITE_FAILED",
            Event::ConcatDiffFailed => "CONCAT_SCHEMA_DIFF_FAILED",
            Event::OfflineChangesDetected => "OFFLINE_SCHEMA_CHANGES_DETECTED",

            Event::BackupBegin => "SCHEMA_BACKUP_BEGIN",
            Event::BackupComplete => "SCHEMA_BACKUP_COMPLETE",
            Event::BackupFailed => "SCHEMA_BACKUP_FAILED",
            Event::BackupRemoved => "SCHEMA_BACKUP_REMOVED",

            Event::RestoreBegin => "SCHEMA_RESTORE_BEGIN",
            Event::RestoreComplete => "SCHEMA_RESTORE_COMPLETE",
            Event::RestoreFailed => "SCHEMA_RESTORE_FAILED",
            Event::VerifyComplete => "SCHEMA_VERIFY_COMPLETE",

            Event::OperatorAlert => "OPERATOR_ALERT",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
