use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use ccpm_driver::{select_driver, Driver};
use ccpm_types::{
    CcpmError, InstallEntry, InstalledPackage, PackagesDatabase, PackagesIndex, ProgressJournal,
    Repository, RepositoryManifest, Result, StepStatus, TransactionRecord, TransactionStatus,
};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::events::{Event, EventSink};
use crate::stores::{PackagesDatabaseStore, PackagesIndexStore, RepositoriesStore};

/// The transaction state machine and commit protocol of §4.6. One instance
/// owns `$DATA/transaction/` (the journal plus the three staging
/// directories) and `install_root`, the sandboxed environment's filesystem
/// root that packages' files are installed under and removed from — the
/// teacher's `target_prefix` by another name.
pub struct Transaction {
    dir: PathBuf,
    install_root: PathBuf,
    record: TransactionRecord,
    progress: ProgressJournal,
}

impl Transaction {
    /// Loads the journal from `dir`, creating it if this is the first run.
    /// Absence of `init.json` is read as [`TransactionStatus::Idle`].
    pub fn load(dir: PathBuf, install_root: PathBuf) -> Result<Self> {
        fs_err::create_dir_all(&dir)?;
        let record = read_json_or_default(&dir.join("init.json"))?;
        let progress = read_json_or_default(&dir.join("progress.json"))?;
        Ok(Self {
            dir,
            install_root,
            record,
            progress,
        })
    }

    pub fn status(&self) -> TransactionStatus {
        self.record.status
    }

    pub fn record(&self) -> &TransactionRecord {
        &self.record
    }

    /// `begin`, per §4.6: legal from `Idle`, `Aborted`, `Committed`, or
    /// `RolledBack`. A `Pending` transaction is auto-aborted first;
    /// `Committing`/`Failed` demand `recover` or `rollback` instead.
    pub fn begin(&mut self) -> Result<()> {
        match self.record.status {
            TransactionStatus::Pending => self.abort()?,
            TransactionStatus::Committing | TransactionStatus::Failed => {
                return Err(CcpmError::state(
                    "a transaction is Committing or Failed; call recover or rollback first",
                ));
            }
            _ => {}
        }

        self.record = TransactionRecord::new(chrono::Utc::now().to_rfc3339());
        self.progress = ProgressJournal::default();
        self.persist_record()?;
        self.persist_progress()
    }

    /// Stages a package for installation. `version` defaults to the
    /// package's `latest_version`; `wanted` defaults to `true` (a named
    /// install is, by definition, wanted).
    pub fn install(
        &mut self,
        name: &str,
        version: Option<String>,
        wanted: Option<bool>,
        index: &PackagesIndex,
    ) -> Result<()> {
        self.require_pending()?;

        let entry = index
            .get(name)
            .ok_or_else(|| CcpmError::invalid_input(format!("unknown package {name}")))?;
        let version = version.unwrap_or_else(|| entry.latest_version.clone());
        if !entry.versions.contains_key(&version) {
            return Err(CcpmError::invalid_input(format!(
                "unknown version {version} of package {name}"
            )));
        }

        self.record.install.push(InstallEntry {
            name: name.to_string(),
            version,
            wanted: wanted.unwrap_or(true),
        });
        self.persist_record()
    }

    /// Stages a currently-installed package for removal.
    pub fn uninstall(&mut self, name: &str, installed: &PackagesDatabase) -> Result<()> {
        self.require_pending()?;
        let pkg = installed
            .get(name)
            .ok_or_else(|| CcpmError::invalid_input(format!("{name} is not installed")))?;
        self.record.uninstall.push(crate::resolver::snapshot(name, pkg));
        self.persist_record()
    }

    /// Runs [`crate::resolver::resolve_dependencies`] over the staged
    /// install list and persists the result.
    pub fn resolve_dependencies(&mut self, installed: &PackagesDatabase, index: &PackagesIndex) -> Result<()> {
        self.require_pending()?;
        crate::resolver::resolve_dependencies(&mut self.record.install, installed, index)?;
        self.persist_record()
    }

    /// Runs [`crate::resolver::resolve_required_by`] over the staged
    /// uninstall list and persists the result.
    pub fn resolve_required_by(&mut self, installed: &PackagesDatabase) -> Result<()> {
        self.require_pending()?;
        crate::resolver::resolve_required_by(&mut self.record.uninstall, installed, &self.record.install);
        self.persist_record()
    }

    /// Runs [`crate::resolver::auto_remove`] over the staged uninstall list
    /// and persists the result.
    pub fn auto_remove(&mut self, installed: &PackagesDatabase, index: &PackagesIndex) -> Result<()> {
        self.require_pending()?;
        crate::resolver::auto_remove(&mut self.record.uninstall, installed, &self.record.install, index);
        self.persist_record()
    }

    /// `abort`, per §4.6: only legal while `Pending`. Discards every staged
    /// operation and wipes the transaction directory.
    pub fn abort(&mut self) -> Result<()> {
        self.require_pending()?;
        self.wipe_staging_dirs()?;
        let _ = fs_err::remove_file(self.init_path());
        let _ = fs_err::remove_file(self.progress_path());
        self.record = TransactionRecord {
            status: TransactionStatus::Aborted,
            ..TransactionRecord::default()
        };
        self.progress = ProgressJournal::default();
        Ok(())
    }

    /// `commit`, per §4.6 steps 1–7. Runs preflight, seals the journal, and
    /// drives download → uninstall → install → promote → finalise. Any
    /// failure past preflight transitions to `Failed` and automatically
    /// rolls back; the error that caused the failure is still returned to
    /// the caller.
    pub async fn commit(
        &mut self,
        repositories: &RepositoriesStore,
        index: &PackagesIndexStore,
        database: &mut PackagesDatabaseStore,
        drivers: &[Box<dyn Driver>],
        events: &dyn EventSink,
    ) -> Result<()> {
        self.require_pending()?;
        events.emit(Event::TransactionChecking);

        let merged_index = index.list();
        if let Err(err) = crate::resolver::preflight(
            &self.record.install,
            &self.record.uninstall,
            &database.list(),
            &merged_index,
        ) {
            events.emit(Event::TransactionFailed {
                reason: err.message.clone(),
            });
            return Err(err);
        }

        self.seal()?;
        self.drive_to_completion(repositories, index, database, drivers, events).await
    }

    /// `recover`, per §4.6: legal only while `Committing`. Resumes the
    /// commit protocol from step 3, skipping any progress entry already
    /// `Completed`.
    pub async fn recover(
        &mut self,
        repositories: &RepositoriesStore,
        index: &PackagesIndexStore,
        database: &mut PackagesDatabaseStore,
        drivers: &[Box<dyn Driver>],
        events: &dyn EventSink,
    ) -> Result<()> {
        if self.record.status != TransactionStatus::Committing {
            return Err(CcpmError::state("recover is only legal while Committing"));
        }
        self.drive_to_completion(repositories, index, database, drivers, events).await
    }

    /// `rollback`, per §4.6: legal only while `Committing` or `Failed`.
    /// Restores the inverse of whatever progress entries are `Completed`.
    pub fn rollback(&mut self, database: &mut PackagesDatabaseStore, events: &dyn EventSink) -> Result<()> {
        if !matches!(
            self.record.status,
            TransactionStatus::Committing | TransactionStatus::Failed
        ) {
            return Err(CcpmError::state("rollback is only legal while Committing or Failed"));
        }

        for (j, entry) in self.record.install.iter().enumerate() {
            let progress_index = self.record.uninstall.len() + j;
            if self.progress.is_completed(progress_index) {
                database.remove(&entry.name)?;
            }
        }

        merge_move_tree(&self.uninstall_dir(), &self.install_root, events)?;
        for (i, entry) in self.record.uninstall.iter().enumerate() {
            if self.progress.is_completed(i) {
                database.insert(
                    entry.name.clone(),
                    InstalledPackage {
                        version: entry.version.clone(),
                        files: entry.files.clone(),
                        dependencies: entry.dependencies.clone(),
                        description: entry.description.clone(),
                        license: entry.license.clone(),
                        authors: entry.authors.clone(),
                        maintainers: entry.maintainers.clone(),
                        wanted: entry.wanted,
                    },
                )?;
            }
        }

        self.wipe_staging_dirs()?;
        self.record.status = TransactionStatus::RolledBack;
        self.persist_record()?;
        events.emit(Event::TransactionRolledBack);
        Ok(())
    }

    async fn drive_to_completion(
        &mut self,
        repositories: &RepositoriesStore,
        index: &PackagesIndexStore,
        database: &mut PackagesDatabaseStore,
        drivers: &[Box<dyn Driver>],
        events: &dyn EventSink,
    ) -> Result<()> {
        let outcome = self
            .run_commit_steps(repositories, index, database, drivers, events)
            .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(err) => {
                self.record.status = TransactionStatus::Failed;
                self.persist_record()?;
                events.emit(Event::TransactionFailed {
                    reason: err.message.clone(),
                });
                self.rollback(database, events)?;
                Err(err)
            }
        }
    }

    async fn run_commit_steps(
        &mut self,
        repositories: &RepositoriesStore,
        index: &PackagesIndexStore,
        database: &mut PackagesDatabaseStore,
        drivers: &[Box<dyn Driver>],
        events: &dyn EventSink,
    ) -> Result<()> {
        self.download(repositories, index, drivers, events).await?;
        self.run_uninstalls(database, events)?;
        self.run_installs(database, events)?;
        self.promote(events)?;
        self.finalize(events)
    }

    fn seal(&mut self) -> Result<()> {
        self.progress = ProgressJournal::new(self.record.uninstall.len() + self.record.install.len());
        self.record.status = TransactionStatus::Committing;
        self.persist_record()?;
        self.persist_progress()
    }

    async fn download(
        &mut self,
        repositories: &RepositoriesStore,
        index: &PackagesIndexStore,
        drivers: &[Box<dyn Driver>],
        events: &dyn EventSink,
    ) -> Result<()> {
        events.emit(Event::TransactionDownloading {
            count: self.record.install.len(),
        });

        let download_dir = self.download_dir();
        fs_err::create_dir_all(&download_dir)?;

        let merged_index = index.list();
        let live_repositories: BTreeMap<Uuid, Repository> = repositories.list_with_ids().into_iter().collect();

        for (j, entry) in self.record.install.clone().into_iter().enumerate() {
            let progress_index = self.record.uninstall.len() + j;
            if self.progress.is_completed(progress_index) {
                continue;
            }

            events.emit(Event::PackageDownloading {
                name: entry.name.clone(),
                version: entry.version.clone(),
            });

            let outcome = download_one(&entry, &merged_index, &live_repositories, drivers, &download_dir).await;
            match outcome {
                Ok(()) => events.emit(Event::PackageDownloaded {
                    name: entry.name.clone(),
                    version: entry.version.clone(),
                }),
                Err(err) => {
                    events.emit(Event::PackageNotDownloaded {
                        name: entry.name.clone(),
                        version: entry.version.clone(),
                        reason: err.message.clone(),
                    });
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn run_uninstalls(&mut self, database: &mut PackagesDatabaseStore, events: &dyn EventSink) -> Result<()> {
        events.emit(Event::TransactionUninstalling {
            count: self.record.uninstall.len(),
        });

        let uninstall_dir = self.uninstall_dir();
        for i in 0..self.record.uninstall.len() {
            if self.progress.is_completed(i) {
                continue;
            }
            self.mark_started(i)?;

            let entry = self.record.uninstall[i].clone();
            events.emit(Event::PackageUninstalling { name: entry.name.clone() });

            let outcome = uninstall_one(&entry, &uninstall_dir, &self.install_root, database);
            match outcome {
                Ok(()) => {
                    self.mark_completed(i)?;
                    events.emit(Event::PackageUninstalled { name: entry.name.clone() });
                }
                Err(err) => {
                    events.emit(Event::PackageNotUninstalled {
                        name: entry.name.clone(),
                        reason: err.message.clone(),
                    });
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn run_installs(&mut self, database: &mut PackagesDatabaseStore, events: &dyn EventSink) -> Result<()> {
        events.emit(Event::TransactionInstalling {
            count: self.record.install.len(),
        });

        let download_dir = self.download_dir();
        let install_dir = self.install_dir();
        let mut owners: HashMap<PathBuf, String> = HashMap::new();

        for j in 0..self.record.install.len() {
            let progress_index = self.record.uninstall.len() + j;
            let entry = self.record.install[j].clone();
            let archive_path = download_dir.join(format!("{}.{}.ccp", entry.name, entry.version));

            if self.progress.is_completed(progress_index) {
                // Already unpacked by a prior attempt at this step: register
                // its files so a later entry in this same loop can still be
                // detected as a conflicting claim on the same path.
                if let Ok(bytes) = fs_err::read(&archive_path) {
                    if let Ok(manifest) = ccpm_archive::decode_manifest(&bytes) {
                        for relative in manifest.files.keys() {
                            owners.insert(relative.clone(), entry.name.clone());
                        }
                    }
                }
                continue;
            }
            self.mark_started(progress_index)?;

            events.emit(Event::PackageInstalling {
                name: entry.name.clone(),
                version: entry.version.clone(),
            });

            let result = unpack_idempotently(&archive_path, &install_dir, &entry.name, &mut owners, events);
            let unpacked = match result {
                Ok(unpacked) => unpacked,
                Err(err) => {
                    events.emit(Event::PackageNotInstalled {
                        name: entry.name.clone(),
                        version: entry.version.clone(),
                        reason: err.message.clone(),
                    });
                    return Err(err);
                }
            };

            let files = unpacked
                .files
                .into_iter()
                .map(|(relative, digest)| (Path::new("/").join(relative), digest))
                .collect();

            database.insert(
                entry.name.clone(),
                InstalledPackage {
                    version: unpacked.version,
                    files,
                    dependencies: unpacked.dependencies,
                    description: unpacked.description,
                    license: unpacked.license,
                    authors: unpacked.authors,
                    maintainers: unpacked.maintainers,
                    wanted: entry.wanted,
                },
            )?;

            self.mark_completed(progress_index)?;
            events.emit(Event::PackageInstalled {
                name: entry.name.clone(),
                version: entry.version.clone(),
            });
        }
        Ok(())
    }

    fn promote(&mut self, events: &dyn EventSink) -> Result<()> {
        merge_move_tree(&self.install_dir(), &self.install_root, events)
    }

    fn finalize(&mut self, events: &dyn EventSink) -> Result<()> {
        self.wipe_staging_dirs()?;
        self.record.status = TransactionStatus::Committed;
        self.record.time_commit = Some(chrono::Utc::now().to_rfc3339());
        self.persist_record()?;
        events.emit(Event::TransactionCompleted);
        Ok(())
    }

    fn require_pending(&self) -> Result<()> {
        if self.record.status != TransactionStatus::Pending {
            return Err(CcpmError::state(format!(
                "operation requires a Pending transaction, found {:?}",
                self.record.status
            )));
        }
        Ok(())
    }

    fn mark_started(&mut self, i: usize) -> Result<()> {
        self.progress.entries[i].status = StepStatus::Started;
        self.persist_progress()
    }

    fn mark_completed(&mut self, i: usize) -> Result<()> {
        self.progress.entries[i].status = StepStatus::Completed;
        self.persist_progress()
    }

    fn wipe_staging_dirs(&self) -> Result<()> {
        for dir in [self.download_dir(), self.install_dir(), self.uninstall_dir()] {
            if dir.exists() {
                fs_err::remove_dir_all(&dir)?;
            }
        }
        Ok(())
    }

    fn download_dir(&self) -> PathBuf {
        self.dir.join("download")
    }

    fn install_dir(&self) -> PathBuf {
        self.dir.join("install")
    }

    fn uninstall_dir(&self) -> PathBuf {
        self.dir.join("uninstall")
    }

    fn init_path(&self) -> PathBuf {
        self.dir.join("init.json")
    }

    fn progress_path(&self) -> PathBuf {
        self.dir.join("progress.json")
    }

    fn persist_record(&self) -> Result<()> {
        write_json_atomic(&self.init_path(), &self.record)
    }

    fn persist_progress(&self) -> Result<()> {
        write_json_atomic(&self.progress_path(), &self.progress)
    }
}

/// Moves every file of `entry` from `install_root` into `uninstall_dir`,
/// then removes its database record. A file already absent at the source
/// is a prior, crashed attempt at this same step and is skipped.
fn uninstall_one(
    entry: &ccpm_types::UninstallEntry,
    uninstall_dir: &Path,
    install_root: &Path,
    database: &mut PackagesDatabaseStore,
) -> Result<()> {
    for path in entry.files.keys() {
        let relative = relative_to_root(path);
        let src = install_root.join(&relative);
        if !src.exists() {
            continue;
        }
        let dest = uninstall_dir.join(&relative);
        if let Some(parent) = dest.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::rename(&src, &dest)?;
        prune_empty_parents(&src, install_root)?;
    }

    database.remove(&entry.name)
}

async fn download_one(
    entry: &InstallEntry,
    merged_index: &PackagesIndex,
    live_repositories: &BTreeMap<Uuid, Repository>,
    drivers: &[Box<dyn Driver>],
    download_dir: &Path,
) -> Result<()> {
    let index_entry = merged_index
        .get(&entry.name)
        .ok_or_else(|| CcpmError::invalid_input(format!("unknown package {}", entry.name)))?;
    let repository = live_repositories.get(&index_entry.repository).ok_or_else(|| {
        CcpmError::invalid_input(format!(
            "package {} references an unregistered repository",
            entry.name
        ))
    })?;
    let manifest = RepositoryManifest {
        name: repository.name.clone(),
        url: repository.url.clone(),
        priority: repository.priority,
    };
    let driver = select_driver(drivers, &repository.url)
        .ok_or_else(|| CcpmError::invalid_input(format!("no driver can handle {}", repository.url)))?;
    driver
        .download_package(&manifest, &entry.name, &entry.version, download_dir)
        .await
}

/// Decodes and verifies `archive_path`, first clearing any file it would
/// write that already exists in `dest_dir`. A pre-existing file owned by
/// `package` itself is a partial unpack left behind by a crashed attempt at
/// this same install step, which `recover` must be able to retry without
/// tripping the codec's duplicate-write check. A pre-existing file owned by
/// a *different* staged package is a genuine path collision between two
/// packages in the same transaction, reported via
/// [`Event::FileConflictPackage`] before `package` overwrites it.
fn unpack_idempotently(
    archive_path: &Path,
    dest_dir: &Path,
    package: &str,
    owners: &mut HashMap<PathBuf, String>,
    events: &dyn EventSink,
) -> Result<ccpm_archive::UnpackedPackage> {
    let bytes = fs_err::read(archive_path)?;
    let manifest = ccpm_archive::decode_manifest(&bytes)?;
    for relative_path in manifest.files.keys() {
        let dest = dest_dir.join(relative_path);
        if dest.exists() {
            if let Some(owner) = owners.get(relative_path) {
                if owner != package {
                    events.emit(Event::FileConflictPackage {
                        path: relative_path.clone(),
                        winner: package.to_string(),
                        loser: owner.clone(),
                    });
                }
            }
            fs_err::remove_file(&dest)?;
        }
        owners.insert(relative_path.clone(), package.to_string());
    }
    ccpm_archive::unpack_manifest(&manifest, dest_dir)
}

/// Strips everything but the `Normal` components of `path`, turning an
/// absolute installed-file path like `/lib/y.lua` into the portable
/// relative path `lib/y.lua` used under both `install_root` and the
/// staging directories.
fn relative_to_root(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .collect()
}

/// Walks upward from `removed_file`'s parent, removing directories left
/// empty by the move, stopping at (not including) `boundary`.
fn prune_empty_parents(removed_file: &Path, boundary: &Path) -> Result<()> {
    let mut dir = removed_file.parent();
    while let Some(d) = dir {
        if d == boundary || !d.starts_with(boundary) {
            break;
        }
        match fs_err::read_dir(d) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    break;
                }
            }
            Err(_) => break,
        }
        fs_err::remove_dir(d)?;
        dir = d.parent();
    }
    Ok(())
}

/// Recursively moves every file under `src_dir` to the matching path under
/// `dest_root`, overwriting an existing destination (last writer wins, per
/// §9) but first emitting a [`Event::FileConflictStorage`] so a future
/// policy layer has something to act on, then removes whatever empty
/// directories the move leaves behind. A no-op, and therefore idempotent
/// against a prior partial run, once `src_dir` has nothing left to move.
fn merge_move_tree(src_dir: &Path, dest_root: &Path, events: &dyn EventSink) -> Result<()> {
    if !src_dir.exists() {
        return Ok(());
    }

    for entry in walkdir::WalkDir::new(src_dir) {
        let entry = entry.map_err(|e| CcpmError::fatal(format!("failed to walk {}: {e}", src_dir.display())))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .expect("walkdir yields paths nested under the directory it walks");
        let dest = dest_root.join(relative);
        if let Some(parent) = dest.parent() {
            fs_err::create_dir_all(parent)?;
        }
        if dest.exists() {
            events.emit(Event::FileConflictStorage { path: relative.to_path_buf() });
            fs_err::remove_file(&dest)?;
        }
        fs_err::rename(entry.path(), &dest)?;
    }

    remove_empty_dirs(src_dir)
}

fn remove_empty_dirs(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let mut subdirs = Vec::new();
    for entry in fs_err::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        }
    }
    for sub in subdirs {
        remove_empty_dirs(&sub)?;
    }
    if fs_err::read_dir(dir)?.next().is_none() {
        fs_err::remove_dir(dir)?;
    }
    Ok(())
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .expect("transaction journal path must have a parent directory");
    fs_err::create_dir_all(parent)?;
    let json = serde_json::to_vec_pretty(value)?;

    let mut tmp = tempfile::Builder::new().tempfile_in(parent)?;
    tmp.write_all(&json)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| CcpmError::fatal(format!("failed to persist {}: {e}", path.display())))?;
    Ok(())
}

/// Unlike the three top-level stores, a corrupt transaction journal is not
/// reset to a default: resetting progress to "nothing completed" while
/// files may already be partially moved would silently corrupt installed
/// state. It surfaces as a [`CcpmError::fatal`] instead.
fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let bytes = fs_err::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CcpmError::fatal(format!("transaction journal {} is corrupt: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ccpm_types::{ArchiveFile, ArchiveManifest, ErrorKind, IndexVersion};
    use sha2::Digest;

    use super::*;
    use crate::events::NoopEventSink;

    /// An [`EventSink`] that records every event for assertions, instead of
    /// discarding them like [`NoopEventSink`].
    #[derive(Default)]
    struct RecordingEventSink(Mutex<Vec<Event>>);

    impl EventSink for RecordingEventSink {
        fn emit(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl RecordingEventSink {
        fn events(&self) -> Vec<Event> {
            self.0.lock().unwrap().clone()
        }
    }

    fn transaction_at(root: &Path) -> Transaction {
        Transaction::load(root.join("transaction"), root.join("install_root")).unwrap()
    }

    fn sample_index(repo_id: Uuid, name: &str, version: &str, dependencies: Vec<String>) -> PackagesIndex {
        let mut versions = BTreeMap::new();
        versions.insert(
            version.to_string(),
            IndexVersion {
                digest: "unused".into(),
                dependencies,
            },
        );
        let mut index = PackagesIndex::new();
        index.insert(
            name.to_string(),
            ccpm_types::IndexEntry {
                description: "a package".into(),
                license: "MIT".into(),
                authors: vec![],
                maintainers: vec![],
                latest_version: version.to_string(),
                versions,
                repository: repo_id,
                priority: 0,
            },
        );
        index
    }

    /// Writes `<repo_dir>/pool/<name>.<version>.ccp` so a [`FileDriver`] can
    /// download it, returning the files the unpacked package will own.
    fn write_archive(
        repo_dir: &Path,
        name: &str,
        version: &str,
        files: &[(&str, &str)],
    ) -> BTreeMap<PathBuf, String> {
        let pool = repo_dir.join("pool");
        fs_err::create_dir_all(&pool).unwrap();

        let mut manifest_files = BTreeMap::new();
        let mut owned = BTreeMap::new();
        for (path, content) in files {
            let digest = hex::encode(sha2::Sha256::digest(content.as_bytes()));
            manifest_files.insert(
                PathBuf::from(path),
                ArchiveFile {
                    content: content.to_string(),
                    digest: digest.clone(),
                },
            );
            owned.insert(Path::new("/").join(path), digest);
        }

        let manifest = ArchiveManifest {
            description: "a package".into(),
            license: "MIT".into(),
            authors: vec![],
            maintainers: vec![],
            dependencies: vec![],
            version: version.to_string(),
            files: manifest_files,
        };
        let bytes = ccpm_archive::encode_manifest(&manifest).unwrap();
        fs_err::write(pool.join(format!("{name}.{version}.ccp")), bytes).unwrap();
        owned
    }

    fn file_url(path: &Path) -> String {
        url::Url::from_file_path(path).unwrap().to_string()
    }

    #[test]
    fn begin_moves_idle_transaction_to_pending_with_empty_lists() {
        let root = tempfile::tempdir().unwrap();
        let mut txn = transaction_at(root.path());
        assert_eq!(txn.status(), TransactionStatus::Idle);

        txn.begin().unwrap();
        assert_eq!(txn.status(), TransactionStatus::Pending);
        assert!(txn.record().install.is_empty());
        assert!(txn.record().uninstall.is_empty());
    }

    #[test]
    fn begin_auto_aborts_a_pending_transaction() {
        let root = tempfile::tempdir().unwrap();
        let mut txn = transaction_at(root.path());
        txn.begin().unwrap();
        let index = sample_index(Uuid::new_v4(), "pkga", "1.0.0", vec![]);
        txn.install("pkga", None, None, &index).unwrap();

        txn.begin().unwrap();
        assert_eq!(txn.status(), TransactionStatus::Pending);
        assert!(txn.record().install.is_empty());
    }

    #[test]
    fn install_requires_a_pending_transaction() {
        let root = tempfile::tempdir().unwrap();
        let mut txn = transaction_at(root.path());
        let index = sample_index(Uuid::new_v4(), "pkga", "1.0.0", vec![]);
        let err = txn.install("pkga", None, None, &index).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StateError);
    }

    #[test]
    fn install_defaults_version_to_latest_and_wanted_to_true() {
        let root = tempfile::tempdir().unwrap();
        let mut txn = transaction_at(root.path());
        txn.begin().unwrap();
        let index = sample_index(Uuid::new_v4(), "pkga", "2.0.0", vec![]);

        txn.install("pkga", None, None, &index).unwrap();

        let entry = &txn.record().install[0];
        assert_eq!(entry.version, "2.0.0");
        assert!(entry.wanted);
    }

    #[test]
    fn install_rejects_unknown_package() {
        let root = tempfile::tempdir().unwrap();
        let mut txn = transaction_at(root.path());
        txn.begin().unwrap();
        let index = PackagesIndex::new();

        let err = txn.install("pkga", None, None, &index).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[test]
    fn uninstall_rejects_package_not_installed() {
        let root = tempfile::tempdir().unwrap();
        let mut txn = transaction_at(root.path());
        txn.begin().unwrap();

        let err = txn.uninstall("pkga", &PackagesDatabase::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[test]
    fn abort_discards_staged_operations() {
        let root = tempfile::tempdir().unwrap();
        let mut txn = transaction_at(root.path());
        txn.begin().unwrap();
        let index = sample_index(Uuid::new_v4(), "pkga", "1.0.0", vec![]);
        txn.install("pkga", None, None, &index).unwrap();

        txn.abort().unwrap();

        assert_eq!(txn.status(), TransactionStatus::Aborted);
        assert!(txn.record().install.is_empty());
    }

    #[tokio::test]
    async fn commit_requires_a_pending_transaction() {
        let root = tempfile::tempdir().unwrap();
        let mut txn = transaction_at(root.path());
        let repositories = RepositoriesStore::load(root.path().join("repos.json"), &NoopEventSink).unwrap();
        let index = PackagesIndexStore::load(root.path().join("index.json"), &NoopEventSink).unwrap();
        let mut database = PackagesDatabaseStore::load(root.path().join("db.json"), &NoopEventSink).unwrap();

        let err = txn
            .commit(&repositories, &index, &mut database, &[], &NoopEventSink)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::StateError);
    }

    #[tokio::test]
    async fn recover_requires_a_committing_transaction() {
        let root = tempfile::tempdir().unwrap();
        let mut txn = transaction_at(root.path());
        let repositories = RepositoriesStore::load(root.path().join("repos.json"), &NoopEventSink).unwrap();
        let index = PackagesIndexStore::load(root.path().join("index.json"), &NoopEventSink).unwrap();
        let mut database = PackagesDatabaseStore::load(root.path().join("db.json"), &NoopEventSink).unwrap();

        let err = txn
            .recover(&repositories, &index, &mut database, &[], &NoopEventSink)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::StateError);
    }

    #[test]
    fn rollback_requires_committing_or_failed() {
        let root = tempfile::tempdir().unwrap();
        let mut txn = transaction_at(root.path());
        let mut database = PackagesDatabaseStore::load(root.path().join("db.json"), &NoopEventSink).unwrap();
        let err = txn.rollback(&mut database, &NoopEventSink).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StateError);
    }

    #[tokio::test]
    async fn commit_happy_path_installs_and_writes_files() {
        let root = tempfile::tempdir().unwrap();
        let repo_dir = root.path().join("repo");
        let owned_files = write_archive(&repo_dir, "pkga", "1.0.0", &[("bin/pkga.lua", "print('a')")]);

        let mut repositories = RepositoriesStore::load(root.path().join("repos.json"), &NoopEventSink).unwrap();
        let repo_id = repositories
            .add(Repository {
                name: "local".into(),
                url: file_url(&repo_dir),
                priority: 0,
            })
            .unwrap();

        let mut index_store = PackagesIndexStore::load(root.path().join("index.json"), &NoopEventSink).unwrap();
        index_store.set(sample_index(repo_id, "pkga", "1.0.0", vec![])).unwrap();

        let mut database = PackagesDatabaseStore::load(root.path().join("db.json"), &NoopEventSink).unwrap();
        let drivers: Vec<Box<dyn Driver>> = vec![Box::new(ccpm_driver::FileDriver::new())];
        let events = RecordingEventSink::default();

        let mut txn = transaction_at(root.path());
        txn.begin().unwrap();
        txn.install("pkga", None, None, &index_store.list()).unwrap();
        txn.commit(&repositories, &index_store, &mut database, &drivers, &events)
            .await
            .unwrap();

        assert_eq!(txn.status(), TransactionStatus::Committed);
        let installed = database.get("pkga").unwrap();
        assert_eq!(installed.files, owned_files);

        let written = fs_err::read_to_string(root.path().join("install_root/bin/pkga.lua")).unwrap();
        assert_eq!(written, "print('a')");

        assert!(events.events().iter().any(|e| matches!(e, Event::TransactionCompleted)));
        assert!(!root.path().join("transaction/install").exists());
    }

    #[tokio::test]
    async fn recover_is_idempotent_once_every_step_is_already_completed() {
        let root = tempfile::tempdir().unwrap();
        let txn_dir = root.path().join("transaction");
        let install_root = root.path().join("install_root");
        fs_err::create_dir_all(&txn_dir).unwrap();

        let record = TransactionRecord {
            time_begin: "2026-01-01T00:00:00Z".into(),
            time_commit: None,
            status: TransactionStatus::Committing,
            install: vec![InstallEntry {
                name: "pkga".into(),
                version: "1.0.0".into(),
                wanted: true,
            }],
            uninstall: vec![],
        };
        write_json_atomic(&txn_dir.join("init.json"), &record).unwrap();
        let progress = ProgressJournal::new(1);
        let mut progress = progress;
        progress.entries[0].status = StepStatus::Completed;
        write_json_atomic(&txn_dir.join("progress.json"), &progress).unwrap();

        let mut database = PackagesDatabaseStore::load(root.path().join("db.json"), &NoopEventSink).unwrap();
        database
            .insert(
                "pkga".into(),
                InstalledPackage {
                    version: "1.0.0".into(),
                    files: BTreeMap::new(),
                    dependencies: vec![],
                    description: "d".into(),
                    license: "MIT".into(),
                    authors: vec![],
                    maintainers: vec![],
                    wanted: true,
                },
            )
            .unwrap();

        let repositories = RepositoriesStore::load(root.path().join("repos.json"), &NoopEventSink).unwrap();
        let index = PackagesIndexStore::load(root.path().join("index.json"), &NoopEventSink).unwrap();
        let drivers: Vec<Box<dyn Driver>> = vec![];

        let mut txn = Transaction::load(txn_dir, install_root).unwrap();
        txn.recover(&repositories, &index, &mut database, &drivers, &NoopEventSink)
            .await
            .unwrap();

        assert_eq!(txn.status(), TransactionStatus::Committed);
        assert!(database.get("pkga").is_some());
    }

    #[test]
    fn rollback_restores_uninstalled_files_and_database_record() {
        let root = tempfile::tempdir().unwrap();
        let txn_dir = root.path().join("transaction");
        let install_root = root.path().join("install_root");
        fs_err::create_dir_all(&txn_dir).unwrap();

        let mut files = BTreeMap::new();
        files.insert(PathBuf::from("/lib/b.lua"), "digest-b".to_string());
        let uninstall_entry = ccpm_types::UninstallEntry {
            name: "pkgb".into(),
            version: "1.0.0".into(),
            files,
            dependencies: vec![],
            description: "d".into(),
            license: "MIT".into(),
            authors: vec![],
            maintainers: vec![],
            wanted: true,
        };
        let record = TransactionRecord {
            time_begin: "2026-01-01T00:00:00Z".into(),
            time_commit: None,
            status: TransactionStatus::Failed,
            install: vec![],
            uninstall: vec![uninstall_entry],
        };
        write_json_atomic(&txn_dir.join("init.json"), &record).unwrap();
        let mut progress = ProgressJournal::new(1);
        progress.entries[0].status = StepStatus::Completed;
        write_json_atomic(&txn_dir.join("progress.json"), &progress).unwrap();

        // The uninstall step had already moved the file into staging before
        // the crash, and removed it (and the database record) at the source.
        let staged = txn_dir.join("uninstall/lib/b.lua");
        fs_err::create_dir_all(staged.parent().unwrap()).unwrap();
        fs_err::write(&staged, "print('b')").unwrap();

        let mut database = PackagesDatabaseStore::load(root.path().join("db.json"), &NoopEventSink).unwrap();

        let mut txn = Transaction::load(txn_dir.clone(), install_root.clone()).unwrap();
        txn.rollback(&mut database, &NoopEventSink).unwrap();

        assert_eq!(txn.status(), TransactionStatus::RolledBack);
        assert!(database.get("pkgb").is_some());
        let restored = fs_err::read_to_string(install_root.join("lib/b.lua")).unwrap();
        assert_eq!(restored, "print('b')");
        assert!(!txn_dir.join("uninstall").exists());
    }

    #[test]
    fn uninstall_one_surfaces_the_underlying_error_on_a_failed_move() {
        let root = tempfile::tempdir().unwrap();
        let install_root = root.path().join("install_root");
        fs_err::create_dir_all(install_root.join("sub")).unwrap();
        fs_err::write(install_root.join("sub/f.lua"), "x").unwrap();

        // `uninstall_dir` is itself a plain file, so creating the `sub`
        // subdirectory under it for the destination fails.
        let uninstall_dir = root.path().join("uninstall_dir");
        fs_err::write(&uninstall_dir, "not a directory").unwrap();

        let mut files = BTreeMap::new();
        files.insert(PathBuf::from("/sub/f.lua"), "digest".to_string());
        let entry = ccpm_types::UninstallEntry {
            name: "pkgc".into(),
            version: "1.0.0".into(),
            files,
            dependencies: vec![],
            description: "d".into(),
            license: "MIT".into(),
            authors: vec![],
            maintainers: vec![],
            wanted: true,
        };

        let mut database = PackagesDatabaseStore::load(root.path().join("db.json"), &NoopEventSink).unwrap();
        database
            .insert(
                "pkgc".into(),
                InstalledPackage {
                    version: "1.0.0".into(),
                    files: BTreeMap::new(),
                    dependencies: vec![],
                    description: "d".into(),
                    license: "MIT".into(),
                    authors: vec![],
                    maintainers: vec![],
                    wanted: true,
                },
            )
            .unwrap();

        let err = uninstall_one(&entry, &uninstall_dir, &install_root, &mut database).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FatalError);
        // The failure happened while moving files, before the database
        // record would have been removed.
        assert!(database.get("pkgc").is_some());
    }

    #[test]
    fn merge_move_tree_emits_conflict_event_and_overwrites() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("src");
        let dest = root.path().join("dest");
        fs_err::create_dir_all(&src).unwrap();
        fs_err::create_dir_all(&dest).unwrap();
        fs_err::write(src.join("file.txt"), "new").unwrap();
        fs_err::write(dest.join("file.txt"), "old").unwrap();

        let events = RecordingEventSink::default();
        merge_move_tree(&src, &dest, &events).unwrap();

        assert_eq!(fs_err::read_to_string(dest.join("file.txt")).unwrap(), "new");
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, Event::FileConflictStorage { path } if path == Path::new("file.txt"))));
    }

    #[test]
    fn unpack_idempotently_reports_conflict_between_two_packages() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("install");
        fs_err::create_dir_all(&dest).unwrap();

        let manifest_a = ArchiveManifest {
            description: "a".into(),
            license: "MIT".into(),
            authors: vec![],
            maintainers: vec![],
            dependencies: vec![],
            version: "1.0.0".into(),
            files: {
                let mut files = BTreeMap::new();
                files.insert(
                    PathBuf::from("bin/shared"),
                    ArchiveFile {
                        content: "from-a".into(),
                        digest: hex::encode(sha2::Sha256::digest(b"from-a")),
                    },
                );
                files
            },
        };
        let manifest_b = ArchiveManifest {
            version: "1.0.0".into(),
            files: {
                let mut files = BTreeMap::new();
                files.insert(
                    PathBuf::from("bin/shared"),
                    ArchiveFile {
                        content: "from-b".into(),
                        digest: hex::encode(sha2::Sha256::digest(b"from-b")),
                    },
                );
                files
            },
            ..manifest_a.clone()
        };

        let archive_a = root.path().join("a.1.0.0.ccp");
        let archive_b = root.path().join("b.1.0.0.ccp");
        fs_err::write(&archive_a, ccpm_archive::encode_manifest(&manifest_a).unwrap()).unwrap();
        fs_err::write(&archive_b, ccpm_archive::encode_manifest(&manifest_b).unwrap()).unwrap();

        let mut owners = HashMap::new();
        let events = RecordingEventSink::default();
        unpack_idempotently(&archive_a, &dest, "a", &mut owners, &events).unwrap();
        unpack_idempotently(&archive_b, &dest, "b", &mut owners, &events).unwrap();

        assert_eq!(fs_err::read_to_string(dest.join("bin/shared")).unwrap(), "from-b");
        assert!(events.events().iter().any(|e| matches!(
            e,
            Event::FileConflictPackage { path, winner, loser }
                if path == Path::new("bin/shared") && winner == "b" && loser == "a"
        )));
    }

    #[test]
    fn relative_to_root_strips_leading_separator() {
        assert_eq!(relative_to_root(Path::new("/lib/y.lua")), PathBuf::from("lib/y.lua"));
    }

    #[test]
    fn prune_empty_parents_removes_directories_up_to_boundary() {
        let root = tempfile::tempdir().unwrap();
        let boundary = root.path().to_path_buf();
        let nested = boundary.join("a/b");
        fs_err::create_dir_all(&nested).unwrap();
        let removed_file = nested.join("f.txt");
        fs_err::write(&removed_file, "x").unwrap();
        fs_err::remove_file(&removed_file).unwrap();

        prune_empty_parents(&removed_file, &boundary).unwrap();

        assert!(!boundary.join("a").exists());
        assert!(boundary.exists());
    }
}
