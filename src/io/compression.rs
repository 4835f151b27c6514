use std::path::{Path, PathBuf};

/// The two magic bytes that open every gzip member
pub const GZIP_MAGIC: &[u8; 2] = b"\x1f\x8b";

pub fn is_gzipped(header: &[u8]) -> bool {
    header.starts_with(GZIP_MAGIC)
}

/// Check whether `path` ends in `.gz`, returning the path with that
/// extension stripped so the inner extension can be inspected.
pub fn is_gzipped_extension(path: &Path) -> (bool, PathBuf) {
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("gz") => (true, path.with_extension("")),
        _ => (false, path.to_path_buf()),
    }
}
