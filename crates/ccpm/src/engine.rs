use std::path::PathBuf;

use ccpm_driver::{Driver, FileDriver, HttpDriver};
use ccpm_types::{CcpmError, Result, TransactionStatus};
use uuid::Uuid;

use crate::events::{EventSink, NoopEventSink};
use crate::lock::EngineLock;
use crate::query::Query;
use crate::stores::{PackagesDatabaseStore, PackagesIndexStore, RepositoriesStore};
use crate::transaction::Transaction;

/// The single entry point a front end (the CLI, out of scope here) builds
/// against. Wires the three stores, the driver table, the event sink, and
/// the transaction state machine together behind one advisory lock on
/// `$DATA/.lock`, per §5.
pub struct Engine {
    _lock: EngineLock,
    repositories: RepositoriesStore,
    index: PackagesIndexStore,
    database: PackagesDatabaseStore,
    transaction: Transaction,
    drivers: Vec<Box<dyn Driver>>,
    events: Box<dyn EventSink>,
}

impl Engine {
    /// Resolves the data directory per §6/§12: `CCPM_DATA_DIR` if set, else
    /// the platform data directory joined with `ccpm`.
    pub fn data_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("CCPM_DATA_DIR") {
            return Ok(PathBuf::from(dir));
        }
        dirs::data_dir()
            .map(|dir| dir.join("ccpm"))
            .ok_or_else(|| CcpmError::fatal("could not determine a platform data directory"))
    }

    /// Opens the engine against `data_dir`, bootstrapping it if absent, with
    /// the default HTTP + file drivers and no event consumer. `install_root`
    /// is the sandboxed environment's filesystem root that packages are
    /// installed under.
    pub fn open(data_dir: PathBuf, install_root: PathBuf) -> Result<Self> {
        Self::open_with(data_dir, install_root, default_drivers(), Box::new(NoopEventSink))
    }

    /// As [`Engine::open`], but with an explicit driver table and event
    /// sink — the hook tests and alternative front ends use.
    pub fn open_with(
        data_dir: PathBuf,
        install_root: PathBuf,
        drivers: Vec<Box<dyn Driver>>,
        events: Box<dyn EventSink>,
    ) -> Result<Self> {
        fs_err::create_dir_all(&data_dir)?;
        let lock = EngineLock::acquire(&data_dir)?;

        let repositories = RepositoriesStore::load(data_dir.join("repositories-index.json"), events.as_ref())?;
        let index = PackagesIndexStore::load(data_dir.join("packages-index.json"), events.as_ref())?;
        let database = PackagesDatabaseStore::load(data_dir.join("packages-database.json"), events.as_ref())?;
        let transaction = Transaction::load(data_dir.join("transaction"), install_root)?;

        Ok(Self {
            _lock: lock,
            repositories,
            index,
            database,
            transaction,
            drivers,
            events,
        })
    }

    /// A read-only view over the stores, per §4.8.
    pub fn query(&self) -> Query<'_> {
        Query::new(&self.repositories, &self.index, &self.database)
    }

    /// The current transaction's state, for the CLI surface's `status` verb.
    pub fn status(&self) -> TransactionStatus {
        self.transaction.status()
    }

    pub async fn add_repository(&mut self, url: &str) -> Result<Uuid> {
        crate::repository::add(&mut self.repositories, &self.drivers, url).await
    }

    pub fn remove_repository(&mut self, id: &Uuid) -> Result<()> {
        crate::repository::remove(&mut self.repositories, id)
    }

    /// The CLI surface's `update` verb: refreshes every repository and
    /// re-merges the packages index.
    pub async fn update(&mut self) -> Result<()> {
        crate::repository::refresh(&mut self.repositories, &mut self.index, &self.drivers, self.events.as_ref()).await
    }

    pub fn begin(&mut self) -> Result<()> {
        self.transaction.begin()
    }

    pub fn install(&mut self, name: &str, version: Option<String>, wanted: Option<bool>) -> Result<()> {
        self.transaction.install(name, version, wanted, &self.index.list())
    }

    pub fn uninstall(&mut self, name: &str) -> Result<()> {
        self.transaction.uninstall(name, &self.database.list())
    }

    pub fn resolve_dependencies(&mut self) -> Result<()> {
        self.transaction.resolve_dependencies(&self.database.list(), &self.index.list())
    }

    pub fn resolve_required_by(&mut self) -> Result<()> {
        self.transaction.resolve_required_by(&self.database.list())
    }

    pub fn auto_remove(&mut self) -> Result<()> {
        self.transaction.auto_remove(&self.database.list(), &self.index.list())
    }

    pub fn abort(&mut self) -> Result<()> {
        self.transaction.abort()
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.transaction
            .commit(&self.repositories, &self.index, &mut self.database, &self.drivers, self.events.as_ref())
            .await
    }

    /// The CLI surface's `recover` verb.
    pub async fn recover(&mut self) -> Result<()> {
        self.transaction
            .recover(&self.repositories, &self.index, &mut self.database, &self.drivers, self.events.as_ref())
            .await
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.transaction.rollback(&mut self.database, self.events.as_ref())
    }
}

fn default_drivers() -> Vec<Box<dyn Driver>> {
    vec![Box::new(HttpDriver::new()), Box::new(FileDriver::new())]
}
