//! The package archive codec described in §4.2: a `.ccp` file is
//! `base64(zlib(json(ArchiveManifest)))`. This crate decodes that blob,
//! verifies every file's digest, and writes the files into a staging
//! directory; it also re-encodes a manifest for the round-trip property in
//! §8.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use base64::Engine;
use ccpm_types::{ArchiveManifest, CcpmError, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// A successfully unpacked package: manifest metadata plus the set of
/// absolute paths it wrote, each mapped to its verified content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedPackage {
    pub description: String,
    pub license: String,
    pub authors: Vec<String>,
    pub maintainers: Vec<String>,
    pub dependencies: Vec<String>,
    pub version: String,
    pub files: BTreeMap<PathBuf, String>,
}

/// Decodes the raw bytes of a `.ccp` file into an [`ArchiveManifest`]
/// (contents still attached, digests not yet verified).
pub fn decode_manifest(archive_bytes: &[u8]) -> Result<ArchiveManifest> {
    let compressed = B64
        .decode(archive_bytes)
        .map_err(|e| CcpmError::invalid_input(format!("archive is not valid base64: {e}")))?;

    let mut json = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| CcpmError::invalid_input(format!("archive is not valid zlib: {e}")))?;

    serde_json::from_slice(&json)
        .map_err(|e| CcpmError::invalid_input(format!("archive manifest is malformed: {e}")))
}

/// Encodes an [`ArchiveManifest`] back into the `.ccp` byte representation.
pub fn encode_manifest(manifest: &ArchiveManifest) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(manifest)?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| CcpmError::fatal(format!("failed to compress archive: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| CcpmError::fatal(format!("failed to compress archive: {e}")))?;

    Ok(B64.encode(compressed).into_bytes())
}

/// Reads and decodes `archive_path`, verifies every file's digest, rejects
/// path traversal and intra-archive path collisions, and writes every file
/// under `dest_dir` (which the caller must have created fresh — §4.2 step 4
/// only fires on duplication *within* the archive).
pub fn unpack(archive_path: &Path, dest_dir: &Path) -> Result<UnpackedPackage> {
    let bytes = fs_err::read(archive_path)?;
    let manifest = decode_manifest(&bytes)?;
    unpack_manifest(&manifest, dest_dir)
}

/// Verifies and writes an already-decoded manifest's files into `dest_dir`.
/// Split out from [`unpack`] so tests and the transaction engine's recover
/// path can operate on a manifest already held in memory.
pub fn unpack_manifest(manifest: &ArchiveManifest, dest_dir: &Path) -> Result<UnpackedPackage> {
    let mut files = BTreeMap::new();

    for (relative_path, entry) in &manifest.files {
        reject_path_traversal(relative_path)?;

        let digest = hex::encode(Sha256::digest(entry.content.as_bytes()));
        if digest != entry.digest {
            return Err(CcpmError::checksum_mismatch(relative_path.display()));
        }

        let dest_path = dest_dir.join(relative_path);
        if dest_path.exists() {
            return Err(CcpmError::conflict(format!(
                "{} is written more than once by this archive",
                relative_path.display()
            )));
        }

        if let Some(parent) = dest_path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::write(&dest_path, entry.content.as_bytes())?;

        files.insert(relative_path.clone(), digest);
    }

    Ok(UnpackedPackage {
        description: manifest.description.clone(),
        license: manifest.license.clone(),
        authors: manifest.authors.clone(),
        maintainers: manifest.maintainers.clone(),
        dependencies: manifest.dependencies.clone(),
        version: manifest.version.clone(),
        files,
    })
}

fn reject_path_traversal(path: &Path) -> Result<()> {
    use std::path::Component;
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(CcpmError::invalid_input(format!(
            "archive path {} escapes the staging directory",
            path.display()
        )));
    }
    if path.is_absolute() {
        return Err(CcpmError::invalid_input(format!(
            "archive path {} must be relative",
            path.display()
        )));
    }
    Ok(())
}
