//! The transactional package engine: the three JSON-backed stores (§4.3),
//! the repository layer (§4.4), the dependency resolver (§4.5), the
//! crash-recoverable transaction engine (§4.6), the event bus (§4.7), the
//! read-only query API (§4.8), and the [`Engine`] facade that wires them
//! together behind the single advisory lock described in §5.

mod engine;
mod events;
mod lock;
mod query;
mod repository;
mod resolver;
mod store;
mod stores;
mod transaction;

pub use ccpm_driver::{Driver, FileDriver, HttpDriver};
pub use engine::Engine;
pub use events::{ChannelEventSink, Event, EventSink, NoopEventSink};
pub use query::Query;
pub use stores::{PackagesDatabaseStore, PackagesIndexStore, RepositoriesStore};
pub use transaction::Transaction;
