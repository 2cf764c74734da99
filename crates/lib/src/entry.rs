//! Boot entries and their on-disk BLS form.
//!
//! A [`BootEntry`] holds the literal key/value pairs of a BootLoader
//! Specification snippet, together with an optional attached [`Profile`]
//! and [`BootParams`]. When both are present, the title, kernel,
//! initramfs and options are generated from the profile's templates
//! instead of being read back literally.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

use crate::bootparams::BootParams;
use crate::digest::sha1_hex;
use crate::error::Error;
use crate::profile::{Profile, ProfileSet};
use crate::template;

/// The comment line recording the attached OS profile.
const OS_IDENTIFIER: &str = "#OsIdentifier:";
/// Length of the boot_id prefix used in file names.
const FILE_ID_LEN: usize = 7;
/// Mode of written entry files.
const ENTRY_MODE: u32 = 0o644;
/// Suffix of entry files.
pub(crate) const ENTRY_SUFFIX: &str = ".conf";

/// A boot entry field.
///
/// The declaration order is the order fields are serialized in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum EntryField {
    Title,
    MachineId,
    Version,
    Linux,
    Efi,
    Initrd,
    Options,
    DeviceTree,
    Architecture,
    Id,
    GrubUsers,
    GrubArg,
    GrubClass,
    /// The computed identity; never stored.
    BootId,
}

impl EntryField {
    /// Every field, in serialization order.
    pub const ALL: [EntryField; 14] = [
        Self::Title,
        Self::MachineId,
        Self::Version,
        Self::Linux,
        Self::Efi,
        Self::Initrd,
        Self::Options,
        Self::DeviceTree,
        Self::Architecture,
        Self::Id,
        Self::GrubUsers,
        Self::GrubArg,
        Self::GrubClass,
        Self::BootId,
    ];

    /// The in-memory field name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::MachineId => "machine_id",
            Self::Version => "version",
            Self::Linux => "linux",
            Self::Efi => "efi",
            Self::Initrd => "initrd",
            Self::Options => "options",
            Self::DeviceTree => "devicetree",
            Self::Architecture => "architecture",
            Self::Id => "id",
            Self::GrubUsers => "grub_users",
            Self::GrubArg => "grub_arg",
            Self::GrubClass => "grub_class",
            Self::BootId => "boot_id",
        }
    }

    /// The key used in entry files, or `None` for computed fields.
    pub fn bls_key(self) -> Option<&'static str> {
        match self {
            Self::MachineId => Some("machine-id"),
            Self::BootId => None,
            // The grub extension keys are spelled with underscores
            other => Some(other.name()),
        }
    }
}

impl Display for EntryField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntryField {
    type Err = Error;

    /// Parse a field name, accepting either the in-memory or on-disk spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| Error::UnknownField(s.to_owned()))
    }
}

#[derive(Clone, Debug)]
struct CachedId {
    generation: Option<u64>,
    id: String,
}

/// A BootLoader Specification boot entry.
#[derive(Clone, Debug)]
pub struct BootEntry {
    entry_data: BTreeMap<EntryField, String>,
    bp: Option<BootParams>,
    /// Generation of `bp` when it was last attached or written
    bp_generation: u64,
    profile: Option<Arc<dyn Profile>>,
    /// Comment lines preceding each key in a loaded file
    comments: BTreeMap<EntryField, String>,
    unwritten: bool,
    boot_id: RefCell<Option<CachedId>>,
    last_path: Option<Utf8PathBuf>,
}

impl BootEntry {
    fn empty(profile: Option<Arc<dyn Profile>>, bp: Option<BootParams>) -> Self {
        let bp_generation = bp.as_ref().map_or(0, BootParams::generation);
        Self {
            entry_data: BTreeMap::new(),
            bp,
            bp_generation,
            profile,
            comments: BTreeMap::new(),
            unwritten: true,
            boot_id: RefCell::new(None),
            last_path: None,
        }
    }

    fn require_title(&self) -> Result<()> {
        if self.title().is_none_or(|t| t.is_empty()) {
            return Err(Error::MissingField("title").into());
        }
        Ok(())
    }

    /// Create a new entry.
    ///
    /// The title may be omitted when the profile supplies a title
    /// template.
    pub fn new(
        title: Option<&str>,
        machine_id: &str,
        profile: Option<Arc<dyn Profile>>,
        bp: Option<BootParams>,
    ) -> Result<Self> {
        if machine_id.trim().is_empty() {
            return Err(Error::MissingField("machine_id").into());
        }
        let mut r = Self::empty(profile, bp);
        if let Some(title) = title.filter(|t| !t.is_empty()) {
            r.entry_data.insert(EntryField::Title, title.to_owned());
        }
        r.entry_data
            .insert(EntryField::MachineId, machine_id.trim().to_owned());
        r.require_title()?;
        Ok(r)
    }

    /// Create an entry from literal field values.
    ///
    /// If a profile is given without boot params, they are recovered
    /// from the literal options.
    pub fn from_data(
        data: BTreeMap<EntryField, String>,
        profile: Option<Arc<dyn Profile>>,
        bp: Option<BootParams>,
    ) -> Result<Self> {
        if data.contains_key(&EntryField::BootId) {
            return Err(Error::ReadOnlyField("boot_id").into());
        }
        if data
            .get(&EntryField::MachineId)
            .is_none_or(|m| m.trim().is_empty())
        {
            return Err(Error::MissingField("machine_id").into());
        }
        let mut r = Self::empty(profile, bp);
        r.entry_data = data;
        if r.bp.is_none() && r.profile.is_some() && r.entry_data.contains_key(&EntryField::Options) {
            r.bp = BootParams::from_entry(&r)?;
            r.bp_generation = r.bp.as_ref().map_or(0, BootParams::generation);
        }
        r.require_title()?;
        Ok(r)
    }

    /// Parse BLS text. Returns the literal fields, the comments preceding
    /// each key, and the `#OsIdentifier` value if present.
    fn parse(
        path: &Utf8Path,
        text: &str,
    ) -> Result<(
        BTreeMap<EntryField, String>,
        BTreeMap<EntryField, String>,
        Option<String>,
    )> {
        let mut data = BTreeMap::new();
        let mut comments = BTreeMap::new();
        let mut os_id = None;
        let mut pending = String::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                if let Some(id) = trimmed.strip_prefix(OS_IDENTIFIER) {
                    os_id = Some(id.trim().to_owned());
                } else {
                    pending.push_str(line);
                    pending.push('\n');
                }
                continue;
            }
            let (key, value) = trimmed
                .split_once(char::is_whitespace)
                .map_or((trimmed, ""), |(k, v)| (k, v.trim()));
            let field = key
                .parse::<EntryField>()
                .ok()
                .filter(|f| f.bls_key().is_some())
                .ok_or_else(|| Error::UnknownKey {
                    path: path.to_owned(),
                    key: key.to_owned(),
                })?;
            if !pending.is_empty() {
                comments.insert(field, std::mem::take(&mut pending));
            }
            data.insert(field, value.to_owned());
        }
        if !pending.trim().is_empty() {
            tracing::debug!("{path}: dropping trailing comments");
        }
        Ok((data, comments, os_id))
    }

    /// Load an entry file.
    ///
    /// The profile is, in order of preference: `profile`, the OS profile
    /// named by an `#OsIdentifier` comment, or the first OS profile in
    /// `profiles` recognizing the entry. A matching host profile wraps
    /// the OS profile.
    #[context("Loading boot entry {path}")]
    pub fn from_file(
        path: &Utf8Path,
        profiles: &ProfileSet,
        profile: Option<Arc<dyn Profile>>,
    ) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let (mut data, comments, os_id) = Self::parse(path, &text)?;

        if !data.contains_key(&EntryField::MachineId) {
            let machine_id = path
                .file_name()
                .and_then(|n| n.split_once('-'))
                .map(|(m, _)| m)
                .filter(|m| !m.is_empty())
                .ok_or(Error::MissingField("machine_id"))?;
            tracing::debug!("{path}: using machine_id {machine_id} from file name");
            data.insert(EntryField::MachineId, machine_id.to_owned());
        }
        if !data.contains_key(&EntryField::Linux) && !data.contains_key(&EntryField::Efi) {
            return Err(Error::MissingField("linux").into());
        }
        // The file name is derived from the version
        if !data.contains_key(&EntryField::Version) {
            return Err(Error::MissingField("version").into());
        }

        let mut r = Self::empty(None, None);
        r.entry_data = data;
        r.comments = comments;

        r.profile = match profile {
            Some(p) => Some(p),
            None => {
                let os = match os_id.as_deref() {
                    Some(id) => match profiles.find_os(id) {
                        Ok(p) => Some(p),
                        Err(e) => {
                            tracing::warn!("{path}: {e:#}");
                            None
                        }
                    },
                    None => None,
                };
                let os = os.or_else(|| profiles.match_entry(&r));
                let machine_id = r.literal(EntryField::MachineId).unwrap_or_default();
                profiles.resolve(machine_id, os)
            }
        };
        if r.profile.is_some() {
            r.bp = BootParams::from_entry(&r)?;
            r.bp_generation = r.bp.as_ref().map_or(0, BootParams::generation);
        }
        r.require_title()?;
        r.unwritten = false;
        r.last_path = Some(path.to_owned());
        Ok(r)
    }

    /// The literal value of `field`, without templating.
    pub fn literal(&self, field: EntryField) -> Option<&str> {
        self.entry_data.get(&field).map(String::as_str)
    }

    /// The effective value of `field`.
    pub fn get(&self, field: EntryField) -> Option<String> {
        template::field_value(self, field, 0)
    }

    /// The entry title
    pub fn title(&self) -> Option<String> {
        self.get(EntryField::Title)
    }

    /// The machine id
    pub fn machine_id(&self) -> Option<String> {
        self.get(EntryField::MachineId)
    }

    /// The kernel version
    pub fn version(&self) -> Option<String> {
        self.get(EntryField::Version)
    }

    /// The kernel image path
    pub fn linux(&self) -> Option<String> {
        self.get(EntryField::Linux)
    }

    /// The EFI executable path
    pub fn efi(&self) -> Option<String> {
        self.get(EntryField::Efi)
    }

    /// The initramfs image path
    pub fn initrd(&self) -> Option<String> {
        self.get(EntryField::Initrd)
    }

    /// The kernel options, after adding and deleting options.
    pub fn options(&self) -> Option<String> {
        self.get(EntryField::Options)
    }

    /// The device tree path
    pub fn devicetree(&self) -> Option<String> {
        self.get(EntryField::DeviceTree)
    }

    /// The root options implied by the boot params' root layout.
    ///
    /// Requires boot params; empty without a profile.
    pub fn root_opts(&self) -> Option<String> {
        template::root_opts(self, 0)
    }

    /// Set a field.
    ///
    /// An empty value removes optional fields. Setting the options of an
    /// entry with a profile recovers new boot params from them.
    pub fn set(&mut self, field: EntryField, value: &str) -> Result<()> {
        let value = value.trim();
        match field {
            EntryField::BootId => return Err(Error::ReadOnlyField("boot_id").into()),
            EntryField::MachineId if value.is_empty() => {
                return Err(Error::MissingField("machine_id").into())
            }
            EntryField::Title if value.is_empty() && self.profile.is_none() => {
                return Err(Error::MissingField("title").into())
            }
            EntryField::Version => {
                if let Some(bp) = self.bp.as_mut() {
                    bp.set_version(value)?;
                }
            }
            _ => {}
        }
        if value.is_empty() {
            self.entry_data.remove(&field);
        } else {
            self.entry_data.insert(field, value.to_owned());
        }
        if field == EntryField::Options && self.profile.is_some() {
            let bp = BootParams::from_entry(self)?;
            self.set_boot_params(bp);
        }
        self.mark_dirty();
        Ok(())
    }

    /// Set the title.
    pub fn set_title(&mut self, title: &str) -> Result<()> {
        self.set(EntryField::Title, title)
    }

    /// Set the kernel version.
    pub fn set_version(&mut self, version: &str) -> Result<()> {
        self.set(EntryField::Version, version)
    }

    /// Set the literal kernel options.
    pub fn set_options(&mut self, options: &str) -> Result<()> {
        self.set(EntryField::Options, options)
    }

    /// The fields with a non-empty effective value, including the boot_id.
    pub fn keys(&self) -> Vec<EntryField> {
        self.items().into_iter().map(|(k, _)| k).collect()
    }

    /// The non-empty effective fields and their values.
    pub fn items(&self) -> Vec<(EntryField, String)> {
        EntryField::ALL
            .into_iter()
            .filter_map(|f| self.get(f).filter(|v| !v.is_empty()).map(|v| (f, v)))
            .collect()
    }

    /// The attached boot params
    pub fn boot_params(&self) -> Option<&BootParams> {
        self.bp.as_ref()
    }

    /// Mutable access to the boot params. Changes are noticed through the
    /// generation counter.
    pub fn boot_params_mut(&mut self) -> Option<&mut BootParams> {
        self.bp.as_mut()
    }

    /// Replace the boot params.
    pub fn set_boot_params(&mut self, bp: Option<BootParams>) {
        self.bp_generation = bp.as_ref().map_or(0, BootParams::generation);
        self.bp = bp;
        self.mark_dirty();
    }

    /// The attached profile
    pub fn profile(&self) -> Option<&Arc<dyn Profile>> {
        self.profile.as_ref()
    }

    /// Attach or detach a profile.
    pub fn set_profile(&mut self, profile: Option<Arc<dyn Profile>>) {
        self.profile = profile;
        self.mark_dirty();
    }

    /// The path this entry was last loaded from or written to.
    pub fn last_path(&self) -> Option<&Utf8Path> {
        self.last_path.as_deref()
    }

    fn mark_dirty(&mut self) {
        self.unwritten = true;
        *self.boot_id.borrow_mut() = None;
    }

    /// Whether the entry differs from what was last written or loaded.
    pub fn is_dirty(&self) -> bool {
        self.unwritten
            || self
                .bp
                .as_ref()
                .is_some_and(|bp| bp.generation() != self.bp_generation)
    }

    /// The text the identity is computed over: one `key value` line per
    /// non-empty field, in serialization order, without comments.
    fn identity_text(&self) -> String {
        EntryField::ALL
            .into_iter()
            .filter_map(|f| {
                let key = f.bls_key()?;
                let value = self.get(f).filter(|v| !v.is_empty())?;
                Some(format!("{key} {value}"))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The SHA-1 content identifier of this entry.
    pub fn boot_id(&self) -> String {
        let generation = self.bp.as_ref().map(BootParams::generation);
        if let Some(cached) = self.boot_id.borrow().as_ref() {
            if cached.generation == generation {
                return cached.id.clone();
            }
        }
        let id = sha1_hex([self.identity_text().as_str()]);
        tracing::trace!("Computed boot_id {id}");
        *self.boot_id.borrow_mut() = Some(CachedId {
            generation,
            id: id.clone(),
        });
        id
    }

    /// The entry in BLS file format.
    pub fn to_bls_string(&self) -> String {
        let mut r = String::new();
        if let Some(profile) = self.profile.as_ref() {
            r.push_str(&format!("{OS_IDENTIFIER} {}\n", profile.os_id()));
        }
        for (field, value) in self.items() {
            let Some(key) = field.bls_key() else {
                continue;
            };
            if let Some(comment) = self.comments.get(&field) {
                r.push_str(comment);
            }
            r.push_str(&format!("{key} {value}\n"));
        }
        r
    }

    /// The file name for this entry:
    /// `<machine_id>-<boot_id prefix>-<version>.conf`.
    pub fn file_name(&self) -> Result<String> {
        let machine_id = self.machine_id().ok_or(Error::MissingField("machine_id"))?;
        let version = self.version().ok_or(Error::MissingField("version"))?;
        let boot_id = self.boot_id();
        Ok(format!(
            "{machine_id}-{}-{version}{ENTRY_SUFFIX}",
            &boot_id[..FILE_ID_LEN]
        ))
    }

    /// Write the entry into `dir` if it is dirty or `force` is set.
    ///
    /// The file is written to a temporary file, synced and renamed into
    /// place. Returns the path of the entry file.
    #[context("Writing boot entry to {dir}")]
    pub fn write(&mut self, dir: &Utf8Path, force: bool) -> Result<Utf8PathBuf> {
        let path = dir.join(self.file_name()?);
        if !force && !self.is_dirty() {
            tracing::debug!("Entry {} is unchanged", self.boot_id());
            return Ok(path);
        }
        self.require_title()?;
        if self.linux().is_none() && self.efi().is_none() {
            return Err(Error::MissingField("linux").into());
        }

        let text = self.to_bls_string();
        let mut tmp = tempfile::Builder::new()
            .prefix(".boom-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .context("Creating temporary file")?;
        tmp.write_all(text.as_bytes())?;
        tmp.flush()?;
        tmp.as_file().sync_all().context("Syncing")?;
        tmp.as_file()
            .set_permissions(Permissions::from_mode(ENTRY_MODE))
            .context("Setting permissions")?;
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("Renaming to {path}"))?;
        let d = std::fs::File::open(dir).with_context(|| format!("Opening {dir}"))?;
        rustix::fs::fsync(&d).context("fsync")?;

        tracing::info!("Wrote boot entry {path}");
        self.unwritten = false;
        self.bp_generation = self.bp.as_ref().map_or(0, BootParams::generation);
        self.last_path = Some(path.clone());
        Ok(path)
    }

    /// Rewrite the entry into `dir`, removing the previous file if the
    /// file name changed.
    pub fn update(&mut self, dir: &Utf8Path) -> Result<Utf8PathBuf> {
        let old = self.last_path.clone();
        let path = self.write(dir, true)?;
        if let Some(old) = old.filter(|old| *old != path) {
            match std::fs::remove_file(&old) {
                Ok(()) => tracing::info!("Removed stale boot entry {old}"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("Removing {old}")),
            }
        }
        Ok(path)
    }

    /// Remove the entry's file from `dir`.
    #[context("Deleting boot entry")]
    pub fn delete(&self, dir: &Utf8Path) -> Result<()> {
        let path = match self.last_path.as_ref() {
            Some(p) => p.clone(),
            None => dir.join(self.file_name()?),
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!("Deleted boot entry {path}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::EntryNotFound(path).into())
            }
            Err(e) => Err(e).with_context(|| format!("Removing {path}")),
        }
    }
}
