pub use crate::io::traits::{RandomAccessSpectrumIterator, SpectrumAccessError, SpectrumSource};
pub use crate::params::ParamDescribed;
pub use crate::spectrum::SpectrumLike;
pub use std::io::prelude::*;
