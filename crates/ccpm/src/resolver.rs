use std::collections::{HashSet, VecDeque};

use ccpm_types::{CcpmError, InstallEntry, PackagesDatabase, PackagesIndex, Result, UninstallEntry};

/// Extends `install` with the transitive dependency closure of its current
/// contents (§4.5 `resolve_dependencies`). A worklist-BFS: each seed's
/// `IndexEntry` is looked up, and every dependency not already installed or
/// staged is enqueued with `wanted: false`.
pub fn resolve_dependencies(
    install: &mut Vec<InstallEntry>,
    installed: &PackagesDatabase,
    index: &PackagesIndex,
) -> Result<()> {
    let mut staged: HashSet<String> = install.iter().map(|e| e.name.clone()).collect();
    let mut worklist: VecDeque<String> = install.iter().map(|e| e.name.clone()).collect();

    while let Some(name) = worklist.pop_front() {
        let entry = index
            .get(&name)
            .ok_or_else(|| CcpmError::invalid_input(format!("unknown package {name}")))?;

        // The seed may have an explicit version in `install`; dependencies
        // are always resolved against `latest_version` per §1 (unversioned).
        let version = install
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.version.clone())
            .unwrap_or_else(|| entry.latest_version.clone());

        let version_entry = entry.versions.get(&version).ok_or_else(|| {
            CcpmError::invalid_input(format!("unknown version {version} of package {name}"))
        })?;

        for dep in &version_entry.dependencies {
            if installed.contains_key(dep) || staged.contains(dep) {
                continue;
            }
            let dep_entry = index
                .get(dep)
                .ok_or_else(|| CcpmError::invalid_input(format!("unknown package {dep}")))?;

            staged.insert(dep.clone());
            install.push(InstallEntry {
                name: dep.clone(),
                version: dep_entry.latest_version.clone(),
                wanted: false,
            });
            worklist.push_back(dep.clone());
        }
    }

    Ok(())
}

/// Extends `uninstall` with every currently-installed package that
/// transitively depends on one of its seeds (§4.5 `resolve_required_by`).
///
/// A package already staged for install (i.e. being upgraded in this same
/// transaction) is never pulled into the reverse-dependency sweep, per the
/// carve-out preserved from the source in §9.
pub fn resolve_required_by(
    uninstall: &mut Vec<UninstallEntry>,
    installed: &PackagesDatabase,
    install: &[InstallEntry],
) {
    let installing: HashSet<&str> = install.iter().map(|e| e.name.as_str()).collect();
    let mut staged: HashSet<String> = uninstall.iter().map(|e| e.name.clone()).collect();
    let mut worklist: VecDeque<String> = uninstall.iter().map(|e| e.name.clone()).collect();

    while let Some(name) = worklist.pop_front() {
        for (candidate_name, candidate) in installed {
            if staged.contains(candidate_name) || installing.contains(candidate_name.as_str()) {
                continue;
            }
            if candidate.dependencies.iter().any(|d| d == &name) {
                staged.insert(candidate_name.clone());
                uninstall.push(snapshot(candidate_name, candidate));
                worklist.push_back(candidate_name.clone());
            }
        }
    }
}

/// Sweeps orphaned non-wanted packages into `uninstall` (§4.5
/// `auto_remove`): starting from every installed package with
/// `wanted = false` not already staged, repeatedly checks whether anything
/// still depends on it (either an installed survivor or a staged install);
/// if nothing does, it is staged and its own non-wanted dependencies are
/// re-enqueued for the same check.
///
/// Monotone and idempotent per §8: running it twice in the same
/// transaction adds no further entries, because the second pass finds
/// every orphan already in `uninstall`.
pub fn auto_remove(
    uninstall: &mut Vec<UninstallEntry>,
    installed: &PackagesDatabase,
    install: &[InstallEntry],
    index: &PackagesIndex,
) {
    let mut staged: HashSet<String> = uninstall.iter().map(|e| e.name.clone()).collect();

    let mut worklist: VecDeque<String> = installed
        .iter()
        .filter(|(name, pkg)| !pkg.wanted && !staged.contains(*name))
        .map(|(name, _)| name.clone())
        .collect();

    while let Some(name) = worklist.pop_front() {
        if staged.contains(&name) {
            continue;
        }
        let Some(pkg) = installed.get(&name) else {
            continue;
        };

        let depended_on_by_installed = installed.iter().any(|(other_name, other)| {
            other_name != &name
                && !staged.contains(other_name)
                && other.dependencies.iter().any(|d| d == &name)
        });
        let depended_on_by_staged_install = install
            .iter()
            .any(|entry| staged_install_depends_on(entry, &name, index));

        if depended_on_by_installed || depended_on_by_staged_install {
            continue;
        }

        staged.insert(name.clone());
        uninstall.push(snapshot(&name, pkg));

        for dep in &pkg.dependencies {
            if let Some(dep_pkg) = installed.get(dep) {
                if !dep_pkg.wanted && !staged.contains(dep) {
                    worklist.push_back(dep.clone());
                }
            }
        }
    }
}

/// `true` if the package a staged install will bring in (looked up in the
/// merged index at its staged version) depends on `name`.
fn staged_install_depends_on(entry: &InstallEntry, name: &str, index: &PackagesIndex) -> bool {
    index
        .get(&entry.name)
        .and_then(|e| e.versions.get(&entry.version))
        .is_some_and(|v| v.dependencies.iter().any(|d| d == name))
}

pub(crate) fn snapshot(name: &str, pkg: &ccpm_types::InstalledPackage) -> UninstallEntry {
    UninstallEntry {
        name: name.to_string(),
        version: pkg.version.clone(),
        files: pkg.files.clone(),
        dependencies: pkg.dependencies.clone(),
        description: pkg.description.clone(),
        license: pkg.license.clone(),
        authors: pkg.authors.clone(),
        maintainers: pkg.maintainers.clone(),
        wanted: pkg.wanted,
    }
}

/// Runs the four pre-commit checks of §4.5. Any single failure must abort
/// commit before any side effect.
pub fn preflight(
    install: &[InstallEntry],
    uninstall: &[UninstallEntry],
    installed: &PackagesDatabase,
    index: &PackagesIndex,
) -> Result<()> {
    let uninstall_names: HashSet<&str> = uninstall.iter().map(|e| e.name.as_str()).collect();
    let install_names: HashSet<&str> = install.iter().map(|e| e.name.as_str()).collect();

    // 1. Every name in the uninstall list is currently installed.
    for entry in uninstall {
        if !installed.contains_key(&entry.name) {
            return Err(CcpmError::invalid_input(format!(
                "cannot uninstall {}: not installed",
                entry.name
            )));
        }
    }

    // 2. No name in the install list is already installed unless it also
    //    appears in the uninstall list (upgrade).
    for entry in install {
        if installed.contains_key(&entry.name) && !uninstall_names.contains(entry.name.as_str()) {
            return Err(CcpmError::invalid_input(format!(
                "{} is already installed",
                entry.name
            )));
        }
    }

    // 3. For every staged uninstall, no still-present installed package and
    //    no staged-for-install package depends on it, except when it is
    //    being reinstalled in the same transaction.
    for entry in uninstall {
        if install_names.contains(entry.name.as_str()) {
            continue;
        }
        for (other_name, other) in installed {
            if uninstall_names.contains(other_name.as_str()) {
                continue;
            }
            if other.dependencies.iter().any(|d| d == &entry.name) {
                return Err(CcpmError::invalid_input(format!(
                    "cannot uninstall {}: {other_name} depends on it",
                    entry.name
                )));
            }
        }
        for other in install {
            if other.name == entry.name {
                continue;
            }
            if staged_install_depends_on(other, &entry.name, index) {
                return Err(CcpmError::invalid_input(format!(
                    "cannot uninstall {}: staged install of {} depends on it",
                    entry.name, other.name
                )));
            }
        }
    }

    // 4. Every dependency of every staged install is either already
    //    installed (and not being uninstalled) or also staged for install.
    // The dependency list comes from the index entry for the version being
    // installed, not the installed database: a fresh install has no
    // installed record yet, but its dependencies still need checking.
    for entry in install {
        let version_entry = index
            .get(&entry.name)
            .and_then(|e| e.versions.get(&entry.version).cloned())
            .ok_or_else(|| {
                CcpmError::invalid_input(format!(
                    "unknown version {} of package {}",
                    entry.version, entry.name
                ))
            })?;
        for dep in &version_entry.dependencies {
            let satisfied = (installed.contains_key(dep) && !uninstall_names.contains(dep.as_str()))
                || install_names.contains(dep.as_str());
            if !satisfied {
                return Err(CcpmError::invalid_input(format!(
                    "dependency {dep} of {} is not satisfied",
                    entry.name
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccpm_types::{IndexEntry, IndexVersion, InstalledPackage};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn index_with(name: &str, version: &str, deps: Vec<&str>) -> (String, IndexEntry) {
        let mut versions = BTreeMap::new();
        versions.insert(
            version.to_string(),
            IndexVersion {
                digest: "d".into(),
                dependencies: deps.into_iter().map(String::from).collect(),
            },
        );
        (
            name.to_string(),
            IndexEntry {
                description: String::new(),
                license: "MIT".into(),
                authors: vec![],
                maintainers: vec![],
                latest_version: version.into(),
                versions,
                repository: Uuid::new_v4(),
                priority: 0,
            },
        )
    }

    fn installed_with(name: &str, deps: Vec<&str>, wanted: bool) -> (String, InstalledPackage) {
        (
            name.to_string(),
            InstalledPackage {
                version: "1.0.0".into(),
                files: BTreeMap::new(),
                dependencies: deps.into_iter().map(String::from).collect(),
                description: String::new(),
                license: "MIT".into(),
                authors: vec![],
                maintainers: vec![],
                wanted,
            },
        )
    }

    #[test]
    fn resolve_dependencies_pulls_in_transitive_closure() {
        let mut index = PackagesIndex::new();
        let (n, e) = index_with("pkg-a", "1.0.0", vec!["pkg-b"]);
        index.insert(n, e);
        let (n, e) = index_with("pkg-b", "2.0.0", vec![]);
        index.insert(n, e);

        let installed = PackagesDatabase::new();
        let mut install = vec![InstallEntry {
            name: "pkg-a".into(),
            version: "1.0.0".into(),
            wanted: true,
        }];

        resolve_dependencies(&mut install, &installed, &index).unwrap();

        assert_eq!(install.len(), 2);
        assert!(install.iter().any(|e| e.name == "pkg-b" && !e.wanted));
    }

    #[test]
    fn resolve_dependencies_fails_on_unknown_package() {
        let index = PackagesIndex::new();
        let installed = PackagesDatabase::new();
        let mut install = vec![InstallEntry {
            name: "ghost".into(),
            version: "1.0.0".into(),
            wanted: true,
        }];
        assert!(resolve_dependencies(&mut install, &installed, &index).is_err());
    }

    #[test]
    fn orphan_sweep_removes_unwanted_transitive_dependencies() {
        let mut installed = PackagesDatabase::new();
        let (n, p) = installed_with("app", vec!["libA", "libB"], true);
        installed.insert(n, p);
        let (n, p) = installed_with("libA", vec![], false);
        installed.insert(n, p);
        let (n, p) = installed_with("libB", vec![], false);
        installed.insert(n, p);
        let (n, p) = installed_with("libC", vec![], false);
        installed.insert(n, p);

        let mut uninstall = vec![snapshot("app", &installed["app"])];
        resolve_required_by(&mut uninstall, &installed, &[]);
        assert_eq!(uninstall.len(), 1, "nothing requires app");

        auto_remove(&mut uninstall, &installed, &[], &PackagesIndex::new());
        let names: HashSet<_> = uninstall.iter().map(|e| e.name.clone()).collect();
        assert_eq!(
            names,
            ["app", "libA", "libB", "libC"].into_iter().map(String::from).collect()
        );
    }

    #[test]
    fn auto_remove_is_idempotent() {
        let mut installed = PackagesDatabase::new();
        let (n, p) = installed_with("app", vec!["libA"], true);
        installed.insert(n, p);
        let (n, p) = installed_with("libA", vec![], false);
        installed.insert(n, p);

        let mut uninstall = vec![snapshot("app", &installed["app"])];
        auto_remove(&mut uninstall, &installed, &[], &PackagesIndex::new());
        let first_len = uninstall.len();
        auto_remove(&mut uninstall, &installed, &[], &PackagesIndex::new());
        assert_eq!(uninstall.len(), first_len);
    }

    #[test]
    fn preflight_rejects_uninstalling_a_dependency_still_in_use() {
        let mut installed = PackagesDatabase::new();
        let (n, p) = installed_with("app", vec!["lib"], true);
        installed.insert(n, p);
        let (n, p) = installed_with("lib", vec![], false);
        installed.insert(n, p);

        let uninstall = vec![snapshot("lib", &installed["lib"])];
        let err = preflight(&[], &uninstall, &installed, &PackagesIndex::new()).unwrap_err();
        assert_eq!(err.kind, ccpm_types::ErrorKind::InvalidInput);
    }

    #[test]
    fn preflight_rejects_reinstalling_without_uninstall() {
        let mut installed = PackagesDatabase::new();
        let (n, p) = installed_with("app", vec![], true);
        installed.insert(n, p);

        let install = vec![InstallEntry {
            name: "app".into(),
            version: "1.0.0".into(),
            wanted: true,
        }];
        let err = preflight(&install, &[], &installed, &PackagesIndex::new()).unwrap_err();
        assert_eq!(err.kind, ccpm_types::ErrorKind::InvalidInput);
    }

    #[test]
    fn preflight_allows_upgrade_when_uninstall_is_also_staged() {
        let mut installed = PackagesDatabase::new();
        let (n, p) = installed_with("app", vec![], true);
        installed.insert(n, p);

        let mut index = PackagesIndex::new();
        let (n, e) = index_with("app", "2.0.0", vec![]);
        index.insert(n, e);

        let install = vec![InstallEntry {
            name: "app".into(),
            version: "2.0.0".into(),
            wanted: true,
        }];
        let uninstall = vec![snapshot("app", &installed["app"])];
        assert!(preflight(&install, &uninstall, &installed, &index).is_ok());
    }

    #[test]
    fn preflight_rejects_fresh_install_with_unsatisfied_dependency() {
        let installed = PackagesDatabase::new();

        let mut index = PackagesIndex::new();
        let (n, e) = index_with("app", "1.0.0", vec!["lib"]);
        index.insert(n, e);

        let install = vec![InstallEntry {
            name: "app".into(),
            version: "1.0.0".into(),
            wanted: true,
        }];
        let err = preflight(&install, &[], &installed, &index).unwrap_err();
        assert_eq!(err.kind, ccpm_types::ErrorKind::InvalidInput);
    }

    #[test]
    fn preflight_accepts_fresh_install_with_dependency_also_staged() {
        let installed = PackagesDatabase::new();

        let mut index = PackagesIndex::new();
        let (n, e) = index_with("app", "1.0.0", vec!["lib"]);
        index.insert(n, e);
        let (n, e) = index_with("lib", "1.0.0", vec![]);
        index.insert(n, e);

        let install = vec![
            InstallEntry {
                name: "app".into(),
                version: "1.0.0".into(),
                wanted: true,
            },
            InstallEntry {
                name: "lib".into(),
                version: "1.0.0".into(),
                wanted: false,
            },
        ];
        assert!(preflight(&install, &[], &installed, &index).is_ok());
    }
}
