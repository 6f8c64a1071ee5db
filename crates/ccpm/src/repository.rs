use std::collections::BTreeMap;

use ccpm_driver::{normalize_repository_url, select_driver, Driver};
use ccpm_types::{CcpmError, IndexEntry, PackagesIndex, RawPackagesIndex, Repository, Result};
use uuid::Uuid;

use crate::events::{Event, EventSink};
use crate::stores::{PackagesIndexStore, RepositoriesStore};

/// Normalises `url`, selects a driver, fetches its manifest, and registers
/// it as a new repository. Rejects a URL already registered (§4.4 Add).
pub async fn add(
    repositories: &mut RepositoriesStore,
    drivers: &[Box<dyn Driver>],
    url: &str,
) -> Result<Uuid> {
    let url = normalize_repository_url(url);
    let driver = select_driver(drivers, &url)
        .ok_or_else(|| CcpmError::invalid_input(format!("no driver can handle {url}")))?;

    let manifest = driver.get_manifest(&url).await?;

    repositories.add(Repository {
        name: manifest.name,
        url: manifest.url,
        priority: manifest.priority,
    })
}

/// Removes a repository by UUID (§4.4 Remove). Silently succeeds if the id
/// is already absent, matching the store's `remove` semantics.
pub fn remove(repositories: &mut RepositoriesStore, id: &Uuid) -> Result<()> {
    repositories.remove(id)
}

/// Refreshes every registered repository's manifest and packages index,
/// then re-merges them into the packages index, per §4.4 Refresh.
///
/// Atomic-or-nothing: every repository's manifest and index are staged in
/// memory first; only if *all* of them succeed is the merged index
/// persisted. Any single fetch error aborts the refresh leaving the merged
/// index untouched.
pub async fn refresh(
    repositories: &mut RepositoriesStore,
    index: &mut PackagesIndexStore,
    drivers: &[Box<dyn Driver>],
    events: &dyn EventSink,
) -> Result<()> {
    events.emit(Event::IndexUpdateStart);

    let mut updated_repositories = Vec::new();
    let mut staged: BTreeMap<Uuid, RawPackagesIndex> = BTreeMap::new();

    for (id, repository) in repositories.list_with_ids() {
        events.emit(Event::IndexUpdating { repository: id });

        let result = refresh_one(drivers, &repository).await;
        match result {
            Ok((manifest, raw_index)) => {
                let refreshed = Repository {
                    name: manifest.name,
                    url: manifest.url,
                    priority: manifest.priority,
                };
                if refreshed != repository {
                    updated_repositories.push((id, refreshed));
                }
                staged.insert(id, raw_index);
                events.emit(Event::IndexUpdated { repository: id });
            }
            Err(err) => {
                events.emit(Event::IndexNotUpdated {
                    repository: id,
                    reason: err.message.clone(),
                });
                events.emit(Event::IndexUpdateEnd);
                return Err(err);
            }
        }
    }

    // Only now, with every fetch having succeeded, do we touch persistent
    // state: the repository table first (so priorities used by the merge
    // below reflect any migration), then the merged index.
    for (id, repository) in updated_repositories {
        repositories.update(id, repository)?;
    }

    let live_repositories: BTreeMap<Uuid, Repository> = repositories.list_with_ids().into_iter().collect();
    let merged = merge(&staged, &live_repositories);
    index.set(merged)?;

    events.emit(Event::IndexUpdateEnd);
    Ok(())
}

async fn refresh_one(
    drivers: &[Box<dyn Driver>],
    repository: &Repository,
) -> Result<(ccpm_types::RepositoryManifest, RawPackagesIndex)> {
    let driver = select_driver(drivers, &repository.url)
        .ok_or_else(|| CcpmError::invalid_input(format!("no driver can handle {}", repository.url)))?;
    let manifest = driver.get_manifest(&repository.url).await?;
    let raw_index = driver.get_packages_index(&manifest).await?;
    Ok((manifest, raw_index))
}

/// Merges staged per-repository indices into one [`PackagesIndex`],
/// keeping for every package name the entry from the repository with the
/// numerically smallest `priority` (§4.4 Merge).
///
/// Per the open question resolved in §9: priority is always read from the
/// live repository record, never trusted from a previously-merged entry.
fn merge(
    staged: &BTreeMap<Uuid, RawPackagesIndex>,
    live_repositories: &BTreeMap<Uuid, Repository>,
) -> PackagesIndex {
    let mut merged: PackagesIndex = PackagesIndex::new();

    for (repo_id, raw_index) in staged {
        let Some(repository) = live_repositories.get(repo_id) else {
            continue;
        };

        for (name, entry) in raw_index {
            let candidate = IndexEntry {
                description: entry.description.clone(),
                license: entry.license.clone(),
                authors: entry.authors.clone(),
                maintainers: entry.maintainers.clone(),
                latest_version: entry.latest_version.clone(),
                versions: entry.versions.clone(),
                repository: *repo_id,
                priority: repository.priority,
            };

            match merged.get(name) {
                Some(existing) if existing.priority <= candidate.priority => {
                    // Existing entry is at least as strong; keep it. Ties
                    // are broken by iteration order (§4.4: "no stability
                    // guarantee required"), which a `BTreeMap<Uuid, _>`
                    // staging order makes deterministic for tests.
                }
                _ => {
                    merged.insert(name.clone(), candidate);
                }
            }
        }
    }

    merged
}
