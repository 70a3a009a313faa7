//! Tar packaging for the runtime's archive upload endpoint.
//!
//! The runtime only accepts files as tar archives; we only ever upload a single small regular
//! file into an existing directory.

use tar::{Builder, EntryType, Header};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("file name \"{0}\" must be a bare name with no path separators")]
    InvalidName(String),
    #[error("failed to build archive: {0}")]
    Io(#[from] std::io::Error),
}

/// Build a ustar archive holding one regular file.
pub fn single_file(name: &str, contents: &[u8], mode: u32, mtime: i64) -> Result<Vec<u8>, ArchiveError> {
    if name.is_empty() || name.contains('/') {
        return Err(ArchiveError::InvalidName(name.to_string()));
    }

    let mut header = Header::new_ustar();
    header
        .set_path(name)
        .map_err(|_| ArchiveError::InvalidName(name.to_string()))?;
    header.set_entry_type(EntryType::Regular);
    header.set_size(contents.len() as u64);
    header.set_mode(mode);
    header.set_mtime(mtime.max(0) as u64);
    header.set_cksum();

    let mut builder = Builder::new(Vec::new());
    builder.append(&header, contents)?;
    Ok(builder.into_inner()?)
}
