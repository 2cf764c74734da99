//! Error kinds that callers may need to tell apart.
//!
//! Fallible functions in this crate return [`anyhow::Result`]; the kinds
//! below are raised through it and can be recovered with
//! `err.downcast_ref::<Error>()`.

use camino::Utf8PathBuf;

/// A distinguishable failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required field was absent or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    /// Two mutually exclusive fields were both supplied.
    #[error("conflicting fields: {0} and {1} cannot both be set")]
    ConflictingFields(&'static str, &'static str),
    /// A field value could not be interpreted.
    #[error("invalid value for {field}: '{value}'")]
    InvalidValue {
        /// The field name
        field: &'static str,
        /// The offending value
        value: String,
    },
    /// A field name that is not part of a boot entry.
    #[error("unknown boot entry field: '{0}'")]
    UnknownField(String),
    /// An attempt to set a computed field.
    #[error("boot entry field '{0}' is read-only")]
    ReadOnlyField(&'static str),
    /// An unrecognized key in an entry file.
    #[error("unknown key '{key}' in {path}")]
    UnknownKey {
        /// The entry file being parsed
        path: Utf8PathBuf,
        /// The key as it appears in the file
        key: String,
    },
    /// The root device does not exist.
    #[error("root device {0} does not exist")]
    RootDeviceMissing(Utf8PathBuf),
    /// The root device exists but is not a block device.
    #[error("root device {0} is not a block device")]
    RootDeviceNotBlock(Utf8PathBuf),
    /// An entry file that was expected on disk is absent.
    #[error("boot entry file {0} does not exist")]
    EntryNotFound(Utf8PathBuf),
    /// An entry with identical content is already present.
    #[error("boot entry with boot_id {0} already exists")]
    DuplicateEntry(String),
    /// No profile matched the requested identifier.
    #[error("no matching profile for '{0}'")]
    ProfileNotFound(String),
}
