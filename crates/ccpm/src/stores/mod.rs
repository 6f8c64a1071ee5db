mod packages_database;
mod packages_index;
mod repositories;

pub use packages_database::PackagesDatabaseStore;
pub use packages_index::PackagesIndexStore;
pub use repositories::RepositoriesStore;
