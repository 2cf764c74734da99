//! # Boot entry manager
//!
//! This crate manages BootLoader Specification boot entries, generating
//! them from OS and host profiles and recovering the parameters used to
//! generate existing entries.

pub mod bootparams;
pub mod cli;
pub mod config;
pub mod device;
mod digest;
pub mod entry;
mod error;
pub mod profile;
pub mod selection;
pub mod store;
pub mod template;

pub use bootparams::{BootParams, BootParamsOpts};
pub use entry::{BootEntry, EntryField};
pub use error::Error;
pub use profile::{HostProfile, OsProfile, Profile, ProfileSet};
pub use selection::Selection;
pub use store::{EntryEdit, EntryStore};
pub use template::{apply_format, FormatKey};
