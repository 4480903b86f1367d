//! FFT lookup tables
//!
//! VRB-class devices need an SRS FFT coefficient table. Either the default
//! table shipped with pf_bb_config is used, or a custom `.tar.gz` is fetched,
//! verified against its SHA-1 and unpacked into `<workdir>/fft/<sha1>/`.

use crds::{CardConfig, CardModel, FftLutParam};
use flate2::read::GzDecoder;
use sha1::{Digest, Sha1};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::BbDevError;

/// Table shipped for ACC200/VRB1
pub const DEFAULT_VRB1_FFT: &str = "/opt/pf_bb_config/vrb1/srs_fft_windows_coefficient.bin";

/// Table shipped for VRB2
pub const DEFAULT_VRB2_FFT: &str = "/opt/pf_bb_config/vrb2/srs_fft_windows_coefficient.bin";

pub fn default_fft_path(model: CardModel) -> Option<PathBuf> {
    match model {
        CardModel::Acc200 => Some(PathBuf::from(DEFAULT_VRB1_FFT)),
        CardModel::Vrb2 => Some(PathBuf::from(DEFAULT_VRB2_FFT)),
        CardModel::N3000 | CardModel::Acc100 => None,
    }
}

/// Verify `data` against a hex SHA-1 (case-insensitive)
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<(), BbDevError> {
    let actual = hex::encode(Sha1::digest(data));
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(BbDevError::ChecksumMismatch {
            expected: expected.trim().to_string(),
            actual,
        })
    }
}

/// First `.bin` file under `dir`, searching depth-first in name order
pub fn find_table(dir: &Path) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .collect();
    entries.sort();

    for path in &entries {
        if path.is_file() && path.extension().is_some_and(|ext| ext == "bin") {
            return Some(path.clone());
        }
    }
    entries
        .iter()
        .filter(|path| path.is_dir())
        .find_map(|path| find_table(path))
}

/// Unpack a gzip'd tar into `dest`, refusing symlinks and hardlinks
pub fn extract_archive(data: &[u8], dest: &Path) -> Result<PathBuf, BbDevError> {
    fs::create_dir_all(dest).map_err(|e| BbDevError::io(dest, e))?;

    let mut archive = tar::Archive::new(GzDecoder::new(data));
    let entries = archive.entries().map_err(|e| BbDevError::io(dest, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| BbDevError::io(dest, e))?;
        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            let name = entry
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            return Err(BbDevError::UnsafeArchiveEntry(name));
        }
        // unpack_in rejects paths escaping `dest`
        entry.unpack_in(dest).map_err(|e| BbDevError::io(dest, e))?;
    }

    find_table(dest).ok_or_else(|| BbDevError::NoFftTable(dest.to_path_buf()))
}

/// Download, verify and unpack a custom table, reusing a previous extraction
pub async fn fetch_table(
    client: &reqwest::Client,
    workdir: &Path,
    lut: &FftLutParam,
) -> Result<PathBuf, BbDevError> {
    let checksum = lut.fft_checksum.trim().to_ascii_lowercase();
    let dest = workdir.join("fft").join(&checksum);
    if let Some(table) = find_table(&dest) {
        debug!(table = %table.display(), "Using cached FFT table");
        return Ok(table);
    }

    info!(url = %lut.fft_url, "Downloading FFT lookup table");
    let body = client
        .get(&lut.fft_url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    verify_checksum(&body, &checksum)?;

    // Unpack into a scratch directory so a failed extraction is never cached
    let staging = workdir.join("fft").join(format!("{checksum}.partial"));
    let staging_dir = staging.clone();
    let extracted = tokio::task::spawn_blocking(move || {
        let _ = fs::remove_dir_all(&staging_dir);
        extract_archive(&body, &staging_dir)
    })
    .await
    .map_err(|e| BbDevError::io(&staging, std::io::Error::other(e)))?;

    if let Err(e) = extracted {
        let _ = tokio::fs::remove_dir_all(&staging).await;
        return Err(e);
    }
    let _ = tokio::fs::remove_dir_all(&dest).await;
    tokio::fs::rename(&staging, &dest)
        .await
        .map_err(|e| BbDevError::io(&dest, e))?;

    find_table(&dest).ok_or(BbDevError::NoFftTable(dest))
}

/// Table to pass with `-f`, `None` for models without FFT
pub async fn resolve_table(
    client: &reqwest::Client,
    workdir: &Path,
    card: &CardConfig<'_>,
) -> Result<Option<PathBuf>, BbDevError> {
    if !card.needs_fft() {
        return Ok(None);
    }
    match card.fft_lut() {
        Some(lut) if !lut.fft_url.is_empty() => fetch_table(client, workdir, lut).await.map(Some),
        _ => Ok(default_fft_path(card.model())),
    }
}
