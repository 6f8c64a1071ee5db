use std::path::PathBuf;

use uuid::Uuid;

/// Every progress event the engine can emit, per §4.7. Delivery is
/// advisory: a consumer may ignore any subset, and the producer never
/// blocks waiting for a consumer to finish handling one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    IndexUpdateStart,
    IndexUpdating { repository: Uuid },
    IndexUpdated { repository: Uuid },
    IndexNotUpdated { repository: Uuid, reason: String },
    IndexUpdateEnd,

    TransactionChecking,
    TransactionDownloading { count: usize },
    TransactionUninstalling { count: usize },
    TransactionInstalling { count: usize },
    TransactionCompleted,
    TransactionFailed { reason: String },
    TransactionRolledBack,

    PackageDownloading { name: String, version: String },
    PackageDownloaded { name: String, version: String },
    PackageNotDownloaded { name: String, version: String, reason: String },

    PackageUninstalling { name: String },
    PackageUninstalled { name: String },
    PackageNotUninstalled { name: String, reason: String },

    PackageInstalling { name: String, version: String },
    PackageInstalled { name: String, version: String },
    PackageNotInstalled { name: String, version: String, reason: String },

    Backup { original: PathBuf, backup: PathBuf },
    FileConflictStorage { path: PathBuf },
    FileConflictPackage { path: PathBuf, winner: String, loser: String },
}

/// A sink that receives [`Event`]s emitted by the engine, handed to it at
/// construction time. The engine never reaches for ambient process-level
/// state (a global queue, `println!`) to report progress.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// A sink that discards every event. Used as the default when an `Engine`
/// is constructed without an explicit consumer.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: Event) {}
}

/// A sink that forwards every event onto a bounded [`tokio::sync::mpsc`]
/// channel, for a consumer (e.g. the CLI) that wants to drain events
/// asynchronously rather than be called back in-line.
pub struct ChannelEventSink {
    sender: tokio::sync::mpsc::Sender<Event>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<Event>) {
        let (sender, receiver) = tokio::sync::mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: Event) {
        // Fire-and-forget, per §4.7: a full channel (a consumer that isn't
        // draining) must never block or panic the producer.
        let _ = self.sender.try_send(event);
    }
}
