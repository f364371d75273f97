//! Python packages and package sets.

pub mod index;
pub mod package;
pub mod set;

pub use index::{IndexError, IndexRecord, PackageIndex, PyPiIndex};
pub use package::{PackageSource, PythonPackage, normalize_name};
pub use set::PackageSet;
