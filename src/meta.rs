//! Document-level metadata that precedes the spectra of an mzML file
pub mod file_description;
pub mod run;

pub use crate::meta::file_description::{FileDescription, SourceFile};
pub use crate::meta::run::MassSpectrometryRun;
