use std::io::{self, prelude::*, SeekFrom};
use std::path::Path;

use flate2::bufread::GzDecoder;
use log::trace;

use crate::io::compression::{is_gzipped, is_gzipped_extension};
use crate::io::mzml::is_mzml;

/// How many bytes of a stream are inspected to recognize its format
const SNIFF_SIZE: u64 = 4096;

/// Mass spectrometry file formats that [`mzstream`](crate) recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MassSpectrometryFormat {
    MzML,
    Unknown,
}

/// Given a path, infer the file format and whether or not the file at that path is
/// GZIP compressed
pub fn infer_from_path<P: AsRef<Path>>(path: P) -> (MassSpectrometryFormat, bool) {
    let (is_gzipped, path) = is_gzipped_extension(path.as_ref());
    let form = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("mzml") => MassSpectrometryFormat::MzML,
        _ => MassSpectrometryFormat::Unknown,
    };
    (form, is_gzipped)
}

/// Given a stream of bytes, infer the file format and whether or not the
/// stream is GZIP compressed. The stream is returned to where it started.
pub fn infer_from_stream<R: Read + Seek>(
    stream: &mut R,
) -> io::Result<(MassSpectrometryFormat, bool)> {
    let current_pos = stream.stream_position()?;
    let mut buf = Vec::new();
    stream.by_ref().take(SNIFF_SIZE).read_to_end(&mut buf)?;
    stream.seek(SeekFrom::Start(current_pos))?;

    let is_stream_gzipped = is_gzipped(&buf);
    if is_stream_gzipped {
        let mut decoder = GzDecoder::new(buf.as_slice());
        let mut decompressed_buf = Vec::new();
        // Only a prefix of the member was read, so the decoder is expected to
        // stop early
        if let Err(e) = decoder.read_to_end(&mut decompressed_buf) {
            trace!("Partial gzip prefix decoded {} bytes: {e}", decompressed_buf.len());
        }
        buf = decompressed_buf;
    }
    let form = if is_mzml(&buf) {
        MassSpectrometryFormat::MzML
    } else {
        MassSpectrometryFormat::Unknown
    };
    Ok((form, is_stream_gzipped))
}
