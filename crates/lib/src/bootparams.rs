//! The variable inputs needed to instantiate a profile's templates.
//!
//! A [`BootParams`] carries the kernel version, a description of the root
//! device and the options to add to or remove from the profile's option
//! template. Every mutation advances a generation counter; the owning
//! [`BootEntry`] compares it against a snapshot to notice changes made
//! through [`BootEntry::boot_params_mut`].

use std::fmt::Display;

use anyhow::Result;
use boom_kernel_cmdline::Cmdline;

use crate::entry::{BootEntry, EntryField};
use crate::error::Error;
use crate::template::FormatKey;

/// Option names that are only templated when the corresponding root
/// layout is in use, and so are never recorded as deleted.
const OPTIONAL_ROOT_OPTS: &[&str] = &[
    boom_kernel_cmdline::ROOTFLAGS,
    boom_kernel_cmdline::RD_LVM_LV,
    "subvol",
    "subvolid",
];

/// Optional arguments for [`BootParams::new`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootParamsOpts {
    /// The root device path or specifier (`UUID=...` etc.)
    pub root_device: Option<String>,
    /// The LVM2 logical volume holding the root file system, as `vg/lv`
    pub lvm_root_lv: Option<String>,
    /// The path of the btrfs subvolume to mount as root
    pub btrfs_subvol_path: Option<String>,
    /// The id of the btrfs subvolume to mount as root
    pub btrfs_subvol_id: Option<String>,
    /// Kernel options to append
    pub add_opts: Vec<String>,
    /// Kernel option specs to remove
    pub del_opts: Vec<String>,
}

/// Boot parameters for a single boot entry.
#[derive(Clone, Debug)]
pub struct BootParams {
    version: String,
    root_device: Option<String>,
    lvm_root_lv: Option<String>,
    btrfs_subvol_path: Option<String>,
    btrfs_subvol_id: Option<String>,
    add_opts: Vec<String>,
    del_opts: Vec<String>,
    generation: u64,
}

/// Empty strings mean "unset" for the optional root selectors.
fn nonempty(v: Option<String>) -> Option<String> {
    v.filter(|v| !v.is_empty())
}

/// Append the non-empty options in `opts` that are not already present.
fn extend_dedup(list: &mut Vec<String>, opts: impl IntoIterator<Item = String>) {
    for opt in opts {
        let opt = opt.trim();
        if !opt.is_empty() && !list.iter().any(|o| o == opt) {
            list.push(opt.to_owned());
        }
    }
}

impl BootParams {
    /// Create boot parameters for kernel `version`.
    ///
    /// If an LVM2 logical volume is given without a root device, the
    /// root device defaults to `/dev/<lv>`.
    pub fn new(version: &str, opts: BootParamsOpts) -> Result<Self> {
        if version.trim().is_empty() {
            return Err(Error::MissingField("version").into());
        }
        let lvm_root_lv = nonempty(opts.lvm_root_lv);
        let btrfs_subvol_path = nonempty(opts.btrfs_subvol_path);
        let btrfs_subvol_id = nonempty(opts.btrfs_subvol_id);
        if btrfs_subvol_path.is_some() && btrfs_subvol_id.is_some() {
            return Err(Error::ConflictingFields("btrfs_subvol_path", "btrfs_subvol_id").into());
        }
        if let Some(id) = btrfs_subvol_id.as_deref() {
            validate_subvol_id(id)?;
        }
        let root_device = opts
            .root_device
            .or_else(|| lvm_root_lv.as_ref().map(|lv| format!("/dev/{lv}")));

        let mut bp = Self {
            version: version.trim().to_owned(),
            root_device,
            lvm_root_lv,
            btrfs_subvol_path,
            btrfs_subvol_id,
            add_opts: Vec::new(),
            del_opts: Vec::new(),
            generation: 0,
        };
        extend_dedup(&mut bp.add_opts, opts.add_opts);
        extend_dedup(&mut bp.del_opts, opts.del_opts);
        Ok(bp)
    }

    /// The kernel version
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The root device; an empty string when it is known to be blank.
    pub fn root_device(&self) -> Option<&str> {
        self.root_device.as_deref()
    }

    /// The root LVM2 logical volume
    pub fn lvm_root_lv(&self) -> Option<&str> {
        self.lvm_root_lv.as_deref()
    }

    /// The root btrfs subvolume path
    pub fn btrfs_subvol_path(&self) -> Option<&str> {
        self.btrfs_subvol_path.as_deref()
    }

    /// The root btrfs subvolume id
    pub fn btrfs_subvol_id(&self) -> Option<&str> {
        self.btrfs_subvol_id.as_deref()
    }

    /// Options appended to the templated options
    pub fn add_opts(&self) -> &[String] {
        &self.add_opts
    }

    /// Option specs removed from the templated options
    pub fn del_opts(&self) -> &[String] {
        &self.del_opts
    }

    /// The number of mutations made since construction.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the root file system is on an LVM2 logical volume.
    pub fn has_lvm2(&self) -> bool {
        self.lvm_root_lv.is_some()
    }

    /// Whether the root file system is a btrfs subvolume.
    pub fn has_btrfs(&self) -> bool {
        self.btrfs_subvol_path.is_some() || self.btrfs_subvol_id.is_some()
    }

    fn bump(&mut self) {
        self.generation += 1;
    }

    /// Set the kernel version.
    pub fn set_version(&mut self, version: &str) -> Result<()> {
        if version.trim().is_empty() {
            return Err(Error::MissingField("version").into());
        }
        self.version = version.trim().to_owned();
        self.bump();
        Ok(())
    }

    /// Set or clear the root device.
    pub fn set_root_device(&mut self, root_device: Option<String>) {
        self.root_device = root_device;
        self.bump();
    }

    /// Set or clear the root logical volume.
    pub fn set_lvm_root_lv(&mut self, lvm_root_lv: Option<String>) {
        self.lvm_root_lv = nonempty(lvm_root_lv);
        self.bump();
    }

    /// Set or clear the btrfs subvolume path. Fails if a subvolume id is set.
    pub fn set_btrfs_subvol_path(&mut self, path: Option<String>) -> Result<()> {
        let path = nonempty(path);
        if path.is_some() && self.btrfs_subvol_id.is_some() {
            return Err(Error::ConflictingFields("btrfs_subvol_path", "btrfs_subvol_id").into());
        }
        self.btrfs_subvol_path = path;
        self.bump();
        Ok(())
    }

    /// Set or clear the btrfs subvolume id. Fails if a subvolume path is set.
    pub fn set_btrfs_subvol_id(&mut self, id: Option<String>) -> Result<()> {
        let id = nonempty(id);
        if id.is_some() && self.btrfs_subvol_path.is_some() {
            return Err(Error::ConflictingFields("btrfs_subvol_path", "btrfs_subvol_id").into());
        }
        if let Some(id) = id.as_deref() {
            validate_subvol_id(id)?;
        }
        self.btrfs_subvol_id = id;
        self.bump();
        Ok(())
    }

    /// Replace the list of options to add.
    pub fn set_add_opts(&mut self, opts: Vec<String>) {
        self.add_opts.clear();
        extend_dedup(&mut self.add_opts, opts);
        self.bump();
    }

    /// Replace the list of option specs to delete.
    pub fn set_del_opts(&mut self, opts: Vec<String>) {
        self.del_opts.clear();
        extend_dedup(&mut self.del_opts, opts);
        self.bump();
    }

    /// Append options to add, skipping any already present.
    pub fn extend_add_opts(&mut self, opts: impl IntoIterator<Item = String>) {
        extend_dedup(&mut self.add_opts, opts);
        self.bump();
    }

    /// Append option specs to delete, skipping any already present.
    pub fn extend_del_opts(&mut self, opts: impl IntoIterator<Item = String>) {
        extend_dedup(&mut self.del_opts, opts);
        self.bump();
    }

    /// The btrfs subvolume as a mount option: `subvolid=<id>` or
    /// `subvol=<path>`.
    pub(crate) fn btrfs_subvolume(&self) -> Option<String> {
        if let Some(id) = self.btrfs_subvol_id.as_deref() {
            Some(format!("subvolid={id}"))
        } else {
            self.btrfs_subvol_path
                .as_deref()
                .map(|path| format!("subvol={path}"))
        }
    }

    /// Record a value captured from an option matching a template key.
    ///
    /// Returns whether the value was recorded. A key that already holds
    /// a value, or whose value conflicts with one already recorded, is
    /// left unchanged.
    fn set_captured(&mut self, key: FormatKey, value: &str) -> Result<bool> {
        match key {
            FormatKey::RootDevice if self.root_device.is_none() => {
                self.set_root_device(Some(value.to_owned()))
            }
            FormatKey::LvmRootLv if self.lvm_root_lv.is_none() && !value.is_empty() => {
                self.set_lvm_root_lv(Some(value.to_owned()))
            }
            FormatKey::BtrfsSubvolPath | FormatKey::BtrfsSubvolId
                if value.is_empty() || self.has_btrfs() =>
            {
                return Ok(false);
            }
            FormatKey::BtrfsSubvolPath => self.set_btrfs_subvol_path(Some(value.to_owned()))?,
            FormatKey::BtrfsSubvolId => self.set_btrfs_subvol_id(Some(value.to_owned()))?,
            FormatKey::Version if value == self.version => {}
            FormatKey::Version => {
                tracing::debug!(
                    "Options carry version '{value}', entry has '{}'",
                    self.version
                );
                return Ok(false);
            }
            _ => {
                tracing::trace!("Ignoring captured value for {key}");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Recover the boot parameters that would regenerate `entry`'s
    /// options from its attached profile.
    ///
    /// Returns `None` if there is no profile, the profile has no option
    /// template to match against, or the entry has no version.
    pub fn from_entry(entry: &BootEntry) -> Result<Option<Self>> {
        let Some(profile) = entry.profile() else {
            return Ok(None);
        };
        let regexes = profile.option_regexes()?;
        if regexes.is_empty() {
            tracing::debug!(
                "Profile {} has no option template; cannot recover boot params",
                profile.os_id()
            );
            return Ok(None);
        }

        let Some(version) = entry.version() else {
            tracing::debug!("Entry has no version; cannot recover boot params");
            return Ok(None);
        };
        let mut bp = BootParams::new(&version, BootParamsOpts::default())?;

        let options = entry.literal(EntryField::Options).unwrap_or_default();
        let cmdline = Cmdline::from(options);
        let words = cmdline.iter_str().collect::<Vec<_>>();
        let mut word_matched = vec![false; words.len()];
        let mut regex_matched = vec![false; regexes.len()];

        tracing::trace!("Matching {} option regexes against '{options}'", regexes.len());
        for (ri, rx) in regexes.iter().enumerate() {
            for (wi, word) in words.iter().enumerate() {
                let Some(caps) = rx.regex().captures(word) else {
                    continue;
                };
                regex_matched[ri] = true;
                let (Some(key), Some(value)) = (rx.key(), caps.get(1)) else {
                    // Fixed words absorb every copy
                    word_matched[wi] = true;
                    continue;
                };
                // A capturing matcher claims only the word it records
                if word_matched[wi] {
                    continue;
                }
                let value = value.as_str();
                if bp.set_captured(key, value)? {
                    tracing::trace!("Matched {key}='{value}'");
                    word_matched[wi] = true;
                    break;
                }
            }
        }

        // A usable BootParams always has a root device
        if bp.root_device.is_none() {
            tracing::debug!("No root device in '{options}'; setting it blank");
            bp.root_device = Some(String::new());
        }

        let host_add = profile.add_opts();
        let host_del = profile.del_opts();

        let unmatched = words
            .iter()
            .zip(&word_matched)
            .filter(|(_, &m)| !m)
            .map(|(w, _)| w.to_string())
            .filter(|w| !host_add.contains(w));
        extend_dedup(&mut bp.add_opts, unmatched);

        let missing = regexes
            .iter()
            .zip(&regex_matched)
            .filter(|(_, &m)| !m)
            .filter(|(rx, _)| !OPTIONAL_ROOT_OPTS.contains(&rx.name()))
            .map(|(rx, _)| rx.del_spec())
            .filter(|d| !host_del.contains(d));
        extend_dedup(&mut bp.del_opts, missing);

        tracing::debug!("Recovered boot params: {bp}");
        Ok(Some(bp))
    }
}

fn validate_subvol_id(id: &str) -> Result<()> {
    if id.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(Error::InvalidValue {
            field: "btrfs_subvol_id",
            value: id.to_owned(),
        }
        .into())
    }
}

impl PartialEq for BootParams {
    /// Equality ignores the generation counter.
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.root_device == other.root_device
            && self.lvm_root_lv == other.lvm_root_lv
            && self.btrfs_subvol_path == other.btrfs_subvol_path
            && self.btrfs_subvol_id == other.btrfs_subvol_id
            && self.add_opts == other.add_opts
            && self.del_opts == other.del_opts
    }
}

impl Eq for BootParams {}

impl Display for BootParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.version)?;
        let fields = [
            ("root_device", self.root_device.as_deref()),
            ("lvm_root_lv", self.lvm_root_lv.as_deref()),
            ("btrfs_subvol_path", self.btrfs_subvol_path.as_deref()),
            ("btrfs_subvol_id", self.btrfs_subvol_id.as_deref()),
        ];
        for (name, value) in fields {
            match value {
                Some(v) if !v.is_empty() => write!(f, ", {name}={v}")?,
                _ => {}
            }
        }
        for (name, opts) in [("add_opts", &self.add_opts), ("del_opts", &self.del_opts)] {
            if !opts.is_empty() {
                write!(f, ", {name}=\"{}\"", opts.join(" "))?;
            }
        }
        Ok(())
    }
}
