//! Coverage eligibility: decides which files get instrumented.

mod error;
mod glob;
mod should_instrument;

pub use error::{CoverageError, GlobError};
pub use glob::{Glob, GlobSet};
pub use should_instrument::{should_instrument, CoverageMatcher};
