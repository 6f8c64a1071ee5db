use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The transaction state machine's states, per §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Idle,
    Pending,
    Committing,
    Committed,
    Aborted,
    Failed,
    RolledBack,
}

impl Default for TransactionStatus {
    fn default() -> Self {
        Self::Idle
    }
}

/// A package staged for installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallEntry {
    pub name: String,
    pub version: String,
    pub wanted: bool,
}

/// A package staged for removal, carrying a full snapshot of its installed
/// record so rollback can restore the database without consulting the
/// (possibly-since-changed) package index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallEntry {
    pub name: String,
    pub version: String,
    pub files: BTreeMap<PathBuf, String>,
    pub dependencies: Vec<String>,
    pub description: String,
    pub license: String,
    pub authors: Vec<String>,
    pub maintainers: Vec<String>,
    pub wanted: bool,
}

/// The persisted transaction journal (`transaction/init.json`). A record
/// whose `status` is [`TransactionStatus::Idle`] is the default used when no
/// `init.json` exists yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TransactionRecord {
    pub time_begin: String,
    pub time_commit: Option<String>,
    pub status: TransactionStatus,
    pub install: Vec<InstallEntry>,
    pub uninstall: Vec<UninstallEntry>,
}

impl TransactionRecord {
    pub fn new(time_begin: String) -> Self {
        Self {
            time_begin,
            time_commit: None,
            status: TransactionStatus::Pending,
            install: Vec::new(),
            uninstall: Vec::new(),
        }
    }
}

/// The status of one step of the commit protocol, per §3's Progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Started,
    Completed,
}

/// One entry of the progress journal. Order convention (§3): all uninstalls
/// first (indices `0..uninstall.len()`), then all installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub status: StepStatus,
}

/// The persisted progress journal (`transaction/progress.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProgressJournal {
    pub entries: Vec<ProgressEntry>,
}

impl ProgressJournal {
    pub fn new(len: usize) -> Self {
        Self {
            entries: vec![
                ProgressEntry {
                    status: StepStatus::Pending
                };
                len
            ],
        }
    }

    pub fn is_completed(&self, index: usize) -> bool {
        matches!(self.entries.get(index), Some(e) if e.status == StepStatus::Completed)
    }
}
