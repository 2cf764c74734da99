//! Kernel command line parsing utilities.
//!
//! This crate provides functionality for splitting a kernel command line
//! (as found in the `options` key of a BLS snippet) into parameters,
//! supporting both key-only switches and key-value pairs with proper quote
//! handling.
//!
//! The `options` module implements the add/delete reconciliation used when
//! a boot entry's option string is generated from a profile template.

mod cmdline;
pub use cmdline::*;
mod options;
pub use options::*;

/// The kernel argument for configuring the rootfs flags.
pub const ROOTFLAGS: &str = "rootflags";
/// The dracut argument activating an LVM2 logical volume.
pub const RD_LVM_LV: &str = "rd.lvm.lv";
