//! Blender Depot
//!
//! A component repository for Blender installations, addons, scripts,
//! virtual environments, setups and launch profiles.
//!
//! # Architecture
//!
//! - **Component Module**: shared identity, storage and deploy behaviour
//! - **Addon / Script Modules**: released and dev packaging units
//! - **Program / Venv Modules**: probed Blender installs and derived venvs
//! - **Setup / Profile Modules**: aggregates that deploy and launch
//! - **Repository Module**: on-disk records, one sub-repository per kind
//!
//! # Usage
//!
//! ```no_run
//! use blender_depot::repository::Repository;
//!
//! let repo = Repository::open(std::path::Path::new("/tmp/depot")).expect("open repository");
//! println!("{}", repo.summary());
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::unnested_or_patterns)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::similar_names)]
#![allow(clippy::struct_excessive_bools)]

pub mod addon;
pub mod component;
pub mod config;
pub mod context;
pub mod dev_library;
pub mod error;
pub mod fsops;
pub mod hashing;
pub mod logging;
pub mod outcome;
pub mod pool;
pub mod process;
pub mod profile;
pub mod program;
pub mod python;
pub mod repository;
pub mod script;
pub mod setup;
pub mod venv;
pub mod version;

// Re-export main types
pub use addon::Addon;
pub use component::{Component, ComponentKind, Deployable, Entity};
pub use config::Config;
pub use context::DepotContext;
pub use dev_library::PythonDevLibrary;
pub use error::{DepotError, Result};
pub use outcome::{BatchOutcome, Outcome};
pub use profile::Profile;
pub use program::BlenderProgram;
pub use repository::Repository;
pub use script::{Script, ScriptVariant};
pub use setup::BlenderSetup;
pub use venv::BlenderVenv;
