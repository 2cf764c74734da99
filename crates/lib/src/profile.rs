//! OS and host profiles.
//!
//! An [`OsProfile`] describes an installed operating system and carries
//! the patterns used to generate boot entries for it. A [`HostProfile`]
//! wraps an OS profile for one machine, overriding its options template
//! and contributing extra options to add or delete.

use std::sync::Arc;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::digest::{min_unique_prefix, sha1_hex};
use crate::entry::{BootEntry, EntryField};
use crate::error::Error;
use crate::template::{make_format_regexes, OptionRegex};

/// File name suffix of OS profiles.
const OS_PROFILE_SUFFIX: &str = ".profile";
/// File name suffix of host profiles.
const HOST_PROFILE_SUFFIX: &str = ".host";

/// The patterns and descriptive fields used to template boot entries.
pub trait Profile: std::fmt::Debug + Send + Sync {
    /// The identifier of the underlying OS profile
    fn os_id(&self) -> &str;
    /// The OS name, e.g. `Fedora Linux`
    fn os_name(&self) -> &str;
    /// The short OS name, e.g. `fedora`
    fn os_short_name(&self) -> &str;
    /// The OS version string
    fn os_version(&self) -> &str;
    /// The OS version id, e.g. `36`
    fn os_version_id(&self) -> &str;
    /// The title template
    fn title(&self) -> &str;
    /// The kernel image path template
    fn kernel_pattern(&self) -> &str;
    /// The initramfs image path template
    fn initramfs_pattern(&self) -> &str;
    /// The kernel options template
    fn options(&self) -> &str;
    /// Root options used when the root is an LVM2 logical volume
    fn root_opts_lvm2(&self) -> &str;
    /// Root options used when the root is a btrfs subvolume
    fn root_opts_btrfs(&self) -> &str;

    /// Options added to every entry using this profile.
    fn add_opts(&self) -> &[String] {
        &[]
    }

    /// Option specs removed from every entry using this profile.
    fn del_opts(&self) -> &[String] {
        &[]
    }

    /// The host identifier, for host profiles.
    fn host_id(&self) -> Option<&str> {
        None
    }

    /// Matchers for each word of the options template.
    fn option_regexes(&self) -> Result<Vec<OptionRegex>> {
        make_format_regexes(self.options(), self.root_opts_lvm2(), self.root_opts_btrfs())
    }
}

fn default_kernel_pattern() -> String {
    "/vmlinuz-%{version}".into()
}

fn default_initramfs_pattern() -> String {
    "/initramfs-%{version}.img".into()
}

fn default_root_opts_lvm2() -> String {
    "rd.lvm.lv=%{lvm_root_lv}".into()
}

fn default_root_opts_btrfs() -> String {
    "rootflags=%{btrfs_subvolume}".into()
}

fn default_options() -> String {
    "root=%{root_device} ro %{root_opts}".into()
}

fn default_title() -> String {
    "%{os_name} %{os_version} (%{version})".into()
}

/// A profile for one operating system release.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OsProfile {
    /// SHA-1 of the name, short name, version and version id
    #[serde(default)]
    pub os_id: String,
    /// The OS name
    pub os_name: String,
    /// The short OS name
    pub os_short_name: String,
    /// The OS version string
    pub os_version: String,
    /// The OS version id
    pub os_version_id: String,
    /// Regex matched against an entry's kernel version when probing
    #[serde(default)]
    pub uname_pattern: String,
    /// Kernel image path template
    #[serde(default = "default_kernel_pattern")]
    pub kernel_pattern: String,
    /// Initramfs image path template
    #[serde(default = "default_initramfs_pattern")]
    pub initramfs_pattern: String,
    /// Root options for an LVM2 root
    #[serde(default = "default_root_opts_lvm2")]
    pub root_opts_lvm2: String,
    /// Root options for a btrfs root
    #[serde(default = "default_root_opts_btrfs")]
    pub root_opts_btrfs: String,
    /// Kernel options template
    #[serde(default = "default_options")]
    pub options: String,
    /// Entry title template
    #[serde(default = "default_title")]
    pub title: String,
}

impl OsProfile {
    /// Create a profile with default patterns.
    pub fn new(name: &str, short_name: &str, version: &str, version_id: &str) -> Result<Self> {
        let fields = [
            ("os_name", name),
            ("os_short_name", short_name),
            ("os_version", version),
            ("os_version_id", version_id),
        ];
        if let Some((field, _)) = fields.into_iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(Error::MissingField(field).into());
        }
        let mut r = Self {
            os_id: String::new(),
            os_name: name.to_owned(),
            os_short_name: short_name.to_owned(),
            os_version: version.to_owned(),
            os_version_id: version_id.to_owned(),
            uname_pattern: String::new(),
            kernel_pattern: default_kernel_pattern(),
            initramfs_pattern: default_initramfs_pattern(),
            root_opts_lvm2: default_root_opts_lvm2(),
            root_opts_btrfs: default_root_opts_btrfs(),
            options: default_options(),
            title: default_title(),
        };
        r.os_id = r.compute_id();
        Ok(r)
    }

    fn compute_id(&self) -> String {
        sha1_hex([
            self.os_name.as_str(),
            &self.os_short_name,
            &self.os_version,
            &self.os_version_id,
        ])
    }

    /// Parse a profile from its JSON representation.
    pub fn from_json(buf: &str) -> Result<Self> {
        let mut r: Self = serde_json::from_str(buf)?;
        if r.os_id.is_empty() {
            r.os_id = r.compute_id();
        }
        Ok(r)
    }

    /// Load a profile file.
    #[context("Loading OS profile {path}")]
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let buf = std::fs::read_to_string(path)?;
        Self::from_json(&buf)
    }

    /// The file name this profile is stored under.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}{}{OS_PROFILE_SUFFIX}",
            self.os_id, self.os_short_name, self.os_version_id
        )
    }

    /// Whether `version` matches this profile's `uname_pattern`.
    pub fn match_uname_version(&self, version: &str) -> bool {
        if self.uname_pattern.is_empty() || version.is_empty() {
            return false;
        }
        match Regex::new(&self.uname_pattern) {
            Ok(re) => re.is_match(version),
            Err(e) => {
                tracing::warn!("Invalid uname_pattern for {}: {e}", self.os_id);
                false
            }
        }
    }

    /// Whether the entry's literal options look generated from this
    /// profile's options template: every fixed word is present, and so
    /// is at least one templated word.
    pub fn match_options(&self, entry: &BootEntry) -> bool {
        let Some(options) = entry.literal(EntryField::Options) else {
            return false;
        };
        let regexes = match self.option_regexes() {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Bad options template for {}: {e:#}", self.os_id);
                return false;
            }
        };
        let (formatted, fixed): (Vec<_>, Vec<_>) =
            regexes.iter().partition(|rx| rx.key().is_some());
        if fixed.is_empty() && formatted.is_empty() {
            return false;
        }
        let found = |rx: &&OptionRegex| options.split_whitespace().any(|w| rx.regex().is_match(w));
        fixed.iter().all(found) && (formatted.is_empty() || formatted.iter().any(found))
    }

    /// Whether the entry's kernel image is this profile's expanded
    /// `kernel_pattern`.
    pub fn match_kernel(&self, entry: &BootEntry) -> bool {
        let Some(version) = entry.version() else {
            return false;
        };
        let kernel = self.kernel_pattern.replace("%{version}", &version);
        entry.literal(EntryField::Linux) == Some(kernel.as_str())
    }
}

impl Profile for OsProfile {
    fn os_id(&self) -> &str {
        &self.os_id
    }
    fn os_name(&self) -> &str {
        &self.os_name
    }
    fn os_short_name(&self) -> &str {
        &self.os_short_name
    }
    fn os_version(&self) -> &str {
        &self.os_version
    }
    fn os_version_id(&self) -> &str {
        &self.os_version_id
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn kernel_pattern(&self) -> &str {
        &self.kernel_pattern
    }
    fn initramfs_pattern(&self) -> &str {
        &self.initramfs_pattern
    }
    fn options(&self) -> &str {
        &self.options
    }
    fn root_opts_lvm2(&self) -> &str {
        &self.root_opts_lvm2
    }
    fn root_opts_btrfs(&self) -> &str {
        &self.root_opts_btrfs
    }

}

/// The on-disk form of a host profile.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct HostProfileFile {
    #[serde(default)]
    host_id: String,
    machine_id: String,
    host_name: String,
    #[serde(default)]
    label: String,
    os_id: String,
    #[serde(default)]
    add_opts: String,
    #[serde(default)]
    del_opts: String,
    #[serde(default)]
    options: Option<String>,
}

/// A per-machine overlay on an [`OsProfile`].
#[derive(Clone, Debug)]
pub struct HostProfile {
    host_id: String,
    machine_id: String,
    host_name: String,
    label: String,
    add_opts: Vec<String>,
    del_opts: Vec<String>,
    options: Option<String>,
    os: Arc<OsProfile>,
}

fn split_opts(opts: &str) -> Vec<String> {
    opts.split_whitespace().map(ToOwned::to_owned).collect()
}

impl HostProfile {
    /// Create a host profile for `machine_id` wrapping `os`.
    pub fn new(machine_id: &str, host_name: &str, label: &str, os: Arc<OsProfile>) -> Result<Self> {
        if machine_id.trim().is_empty() {
            return Err(Error::MissingField("machine_id").into());
        }
        if host_name.trim().is_empty() {
            return Err(Error::MissingField("host_name").into());
        }
        Ok(Self {
            host_id: sha1_hex([machine_id, label]),
            machine_id: machine_id.to_owned(),
            host_name: host_name.to_owned(),
            label: label.to_owned(),
            add_opts: Vec::new(),
            del_opts: Vec::new(),
            options: None,
            os,
        })
    }

    /// Load a host profile file, resolving its OS profile from `os_profiles`.
    #[context("Loading host profile {path}")]
    pub fn load(path: &Utf8Path, os_profiles: &[Arc<OsProfile>]) -> Result<Self> {
        let buf = std::fs::read_to_string(path)?;
        let f: HostProfileFile = serde_json::from_str(&buf)?;
        let os = os_profiles
            .iter()
            .find(|p| p.os_id == f.os_id)
            .ok_or_else(|| Error::ProfileNotFound(f.os_id.clone()))?;
        let mut r = Self::new(&f.machine_id, &f.host_name, &f.label, Arc::clone(os))?;
        if !f.host_id.is_empty() && f.host_id != r.host_id {
            tracing::warn!("{path}: host_id {} does not match computed {}", f.host_id, r.host_id);
        }
        r.set_add_opts(&f.add_opts);
        r.set_del_opts(&f.del_opts);
        r.options = f.options.filter(|o| !o.trim().is_empty());
        Ok(r)
    }

    /// The machine this profile applies to
    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    /// The host name
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// An optional label distinguishing several profiles for one machine
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The wrapped OS profile
    pub fn os_profile(&self) -> &Arc<OsProfile> {
        &self.os
    }

    /// Set the options to add, as a space separated string.
    pub fn set_add_opts(&mut self, opts: &str) {
        self.add_opts = split_opts(opts);
    }

    /// Set the option specs to delete, as a space separated string.
    pub fn set_del_opts(&mut self, opts: &str) {
        self.del_opts = split_opts(opts);
    }

    /// Override the OS profile's options template.
    pub fn set_options(&mut self, options: Option<String>) {
        self.options = options;
    }
}

impl Profile for HostProfile {
    fn os_id(&self) -> &str {
        &self.os.os_id
    }
    fn os_name(&self) -> &str {
        &self.os.os_name
    }
    fn os_short_name(&self) -> &str {
        &self.os.os_short_name
    }
    fn os_version(&self) -> &str {
        &self.os.os_version
    }
    fn os_version_id(&self) -> &str {
        &self.os.os_version_id
    }
    fn title(&self) -> &str {
        &self.os.title
    }
    fn kernel_pattern(&self) -> &str {
        &self.os.kernel_pattern
    }
    fn initramfs_pattern(&self) -> &str {
        &self.os.initramfs_pattern
    }
    fn options(&self) -> &str {
        self.options.as_deref().unwrap_or(&self.os.options)
    }
    fn root_opts_lvm2(&self) -> &str {
        &self.os.root_opts_lvm2
    }
    fn root_opts_btrfs(&self) -> &str {
        &self.os.root_opts_btrfs
    }
    fn add_opts(&self) -> &[String] {
        &self.add_opts
    }
    fn del_opts(&self) -> &[String] {
        &self.del_opts
    }
    fn host_id(&self) -> Option<&str> {
        Some(&self.host_id)
    }
}

const MIN_DISPLAY_ID: usize = 7;

/// Every OS and host profile known to the system.
#[derive(Debug, Default)]
pub struct ProfileSet {
    os: Vec<Arc<OsProfile>>,
    hosts: Vec<Arc<HostProfile>>,
}

/// List the files in `dir` ending in `suffix`, sorted by name.
///
/// A missing directory yields an empty list.
fn list_files(dir: &Utf8Path, suffix: &str) -> Result<Vec<Utf8PathBuf>> {
    let entries = match dir.read_dir_utf8() {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No profile directory {dir}");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e).with_context(|| format!("Reading {dir}")),
    };
    let mut r = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_name().ends_with(suffix) && entry.file_type()?.is_file() {
            r.push(entry.path().to_owned());
        }
    }
    r.sort();
    Ok(r)
}

impl ProfileSet {
    /// Load OS profiles from `profiles_dir` and host profiles from
    /// `hosts_dir`. Files that fail to parse are logged and skipped.
    #[context("Loading profiles")]
    pub fn load(profiles_dir: &Utf8Path, hosts_dir: &Utf8Path) -> Result<Self> {
        let mut r = Self::default();
        for path in list_files(profiles_dir, OS_PROFILE_SUFFIX)? {
            match OsProfile::load(&path) {
                Ok(p) => {
                    r.add_os(p);
                }
                Err(e) => tracing::warn!("Skipping {path}: {e:#}"),
            }
        }
        for path in list_files(hosts_dir, HOST_PROFILE_SUFFIX)? {
            match HostProfile::load(&path, &r.os) {
                Ok(p) => {
                    r.add_host(p);
                }
                Err(e) => tracing::warn!("Skipping {path}: {e:#}"),
            }
        }
        tracing::debug!(
            "Loaded {} OS profiles and {} host profiles",
            r.os.len(),
            r.hosts.len()
        );
        Ok(r)
    }

    /// Add an OS profile.
    pub fn add_os(&mut self, profile: OsProfile) -> Arc<OsProfile> {
        let profile = Arc::new(profile);
        self.os.push(Arc::clone(&profile));
        profile
    }

    /// Add a host profile.
    pub fn add_host(&mut self, profile: HostProfile) -> Arc<HostProfile> {
        let profile = Arc::new(profile);
        self.hosts.push(Arc::clone(&profile));
        profile
    }

    /// The OS profiles
    pub fn os_profiles(&self) -> &[Arc<OsProfile>] {
        &self.os
    }

    /// The host profiles
    pub fn host_profiles(&self) -> &[Arc<HostProfile>] {
        &self.hosts
    }

    /// Find the OS profile whose `os_id` starts with `prefix`.
    pub fn find_os(&self, prefix: &str) -> Result<Arc<OsProfile>> {
        let mut found = self.os.iter().filter(|p| p.os_id.starts_with(prefix));
        match (found.next(), found.next()) {
            (Some(p), None) if !prefix.is_empty() => Ok(Arc::clone(p)),
            (Some(_), Some(_)) => anyhow::bail!("Ambiguous OS profile identifier '{prefix}'"),
            _ => Err(Error::ProfileNotFound(prefix.to_owned()).into()),
        }
    }

    /// Find the host profile for `machine_id`, optionally restricted to
    /// one OS profile.
    pub fn find_host(&self, machine_id: &str, os_id: Option<&str>) -> Option<Arc<HostProfile>> {
        self.hosts
            .iter()
            .find(|h| h.machine_id == machine_id && os_id.is_none_or(|id| h.os.os_id == id))
            .cloned()
    }

    /// The shortened `os_id` shown to users: long enough to tell every
    /// loaded OS profile apart.
    pub fn display_os_id(&self, os_id: &str) -> String {
        let width = min_unique_prefix(self.os.iter().map(|p| p.os_id.as_str()), MIN_DISPLAY_ID);
        os_id.chars().take(width).collect()
    }

    /// Find an OS profile that recognizes `entry`.
    ///
    /// Profiles are tried by `uname_pattern` first, in order of name and
    /// version, then by options template, then by kernel image path.
    pub fn match_entry(&self, entry: &BootEntry) -> Option<Arc<OsProfile>> {
        let version = entry.version().unwrap_or_default();
        let mut by_name = self.os.iter().collect::<Vec<_>>();
        by_name.sort_by(|a, b| (&a.os_name, &a.os_version).cmp(&(&b.os_name, &b.os_version)));
        let (r, how) = if let Some(p) = by_name.into_iter().find(|p| p.match_uname_version(&version)) {
            (p, "uname pattern")
        } else if let Some(p) = self.os.iter().find(|p| p.match_options(entry)) {
            (p, "options template")
        } else if let Some(p) = self.os.iter().find(|p| p.match_kernel(entry)) {
            (p, "kernel path")
        } else {
            tracing::debug!("No OS profile matches entry version '{version}'");
            return None;
        };
        tracing::debug!("Matched OS profile {} ({}) by {how}", r.os_id, r.os_name);
        Some(Arc::clone(r))
    }

    /// The profile to attach to an entry for `machine_id` using `os`: the
    /// matching host profile if there is one, otherwise `os` itself.
    pub fn resolve(&self, machine_id: &str, os: Option<Arc<OsProfile>>) -> Option<Arc<dyn Profile>> {
        let os_id = os.as_ref().map(|p| p.os_id.as_str());
        if let Some(host) = self.find_host(machine_id, os_id) {
            tracing::debug!("Using host profile {} for {machine_id}", host.host_id);
            return Some(host);
        }
        os.map(|p| p as Arc<dyn Profile>)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    static_assertions::assert_impl_all!(OsProfile: Send, Sync);
    static_assertions::assert_impl_all!(HostProfile: Send, Sync);

    #[test]
    fn test_os_profile_defaults() {
        let p = OsProfile::new("Fedora", "fedora", "36 (Server Edition)", "36").unwrap();
        assert_eq!(p.os_id, sha1_hex(["Fedora", "fedora", "36 (Server Edition)", "36"]));
        assert_eq!(p.kernel_pattern, "/vmlinuz-%{version}");
        assert_eq!(p.options, "root=%{root_device} ro %{root_opts}");
        assert_eq!(p.file_name(), format!("{}-fedora36.profile", p.os_id));
        assert!(OsProfile::new("Fedora", "", "36", "36").is_err());
    }

    #[test]
    fn test_os_profile_json() {
        let p = OsProfile::from_json(indoc! { r#"
            {
                "os_name": "Red Hat Enterprise Linux",
                "os_short_name": "rhel",
                "os_version": "9.0 (Plow)",
                "os_version_id": "9.0",
                "uname_pattern": "el9",
                "options": "root=%{root_device} ro %{root_opts} rhgb quiet"
            }
        "# })
        .unwrap();
        assert_eq!(p.os_short_name, "rhel");
        assert_eq!(p.uname_pattern, "el9");
        assert_eq!(p.title, "%{os_name} %{os_version} (%{version})");
        assert_eq!(p.os_id.len(), crate::digest::ID_LEN);
        assert_eq!(p.option_regexes().unwrap().len(), 6);

        assert!(OsProfile::from_json(r#"{"os_name": "x", "bogus": 1}"#).is_err());
    }

    #[test]
    fn test_profile_set_load() {
        let td = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(td.path()).unwrap();
        let profiles = root.join("profiles");
        let hosts = root.join("hosts");
        std::fs::create_dir(&profiles).unwrap();
        std::fs::create_dir(&hosts).unwrap();

        let osp = OsProfile::new("Fedora", "fedora", "36", "36").unwrap();
        let os_id = osp.os_id.clone();
        std::fs::write(
            profiles.join(osp.file_name()),
            serde_json::to_string(&osp).unwrap(),
        )
        .unwrap();
        std::fs::write(profiles.join("broken.profile"), "{").unwrap();
        std::fs::write(profiles.join("ignored.txt"), "{").unwrap();
        std::fs::write(
            hosts.join("a.host"),
            format!(
                r#"{{"machine_id": "ffffffff", "host_name": "h", "os_id": "{os_id}", "add_opts": "debug console=ttyS0", "del_opts": "rhgb"}}"#
            ),
        )
        .unwrap();
        std::fs::write(
            hosts.join("b.host"),
            r#"{"machine_id": "ffffffff", "host_name": "h", "os_id": "nope"}"#,
        )
        .unwrap();

        let set = ProfileSet::load(&profiles, &hosts).unwrap();
        assert_eq!(set.os_profiles().len(), 1);
        assert_eq!(set.host_profiles().len(), 1);
        let host = &set.host_profiles()[0];
        assert_eq!(host.add_opts(), ["debug", "console=ttyS0"]);
        assert_eq!(host.del_opts(), ["rhgb"]);
        assert_eq!(host.host_id(), Some(sha1_hex(["ffffffff", ""]).as_str()));

        assert_eq!(set.find_os(&os_id[..6]).unwrap().os_id, os_id);
        let e = set.find_os("zzz").unwrap_err();
        assert!(matches!(
            e.downcast_ref::<Error>(),
            Some(Error::ProfileNotFound(_))
        ));

        let os = set.find_os(&os_id).unwrap();
        let resolved = set.resolve("ffffffff", Some(Arc::clone(&os))).unwrap();
        assert!(resolved.host_id().is_some());
        let resolved = set.resolve("00000000", Some(os)).unwrap();
        assert!(resolved.host_id().is_none());
        assert!(set.resolve("00000000", None).is_none());
    }

    #[test]
    fn test_profile_set_missing_dirs() {
        let set = ProfileSet::load(
            Utf8Path::new("/nonexistent/profiles"),
            Utf8Path::new("/nonexistent/hosts"),
        )
        .unwrap();
        assert!(set.os_profiles().is_empty());
    }

    #[test]
    fn test_host_options_override() {
        let os = Arc::new(OsProfile::new("Fedora", "fedora", "36", "36").unwrap());
        let mut host = HostProfile::new("ffffffff", "h", "", Arc::clone(&os)).unwrap();
        assert_eq!(host.options(), os.options);
        host.set_options(Some("root=%{root_device} rw".into()));
        assert_eq!(host.options(), "root=%{root_device} rw");
        assert_eq!(host.os_id(), os.os_id);
        assert!(HostProfile::new("", "h", "", os).is_err());
    }

    fn entry(version: &str, options: &str) -> BootEntry {
        let mut data = std::collections::BTreeMap::new();
        data.insert(EntryField::Title, "title".to_owned());
        data.insert(EntryField::MachineId, "ffffffff".to_owned());
        data.insert(EntryField::Version, version.to_owned());
        data.insert(EntryField::Linux, format!("/vmlinuz-{version}"));
        data.insert(EntryField::Options, options.to_owned());
        BootEntry::from_data(data, None, None).unwrap()
    }

    #[test]
    fn test_match_options() {
        let p = OsProfile::new("Fedora", "fedora", "36", "36").unwrap();
        let v = "5.18.0-1.fc36.x86_64";
        assert!(p.match_options(&entry(v, "root=/dev/sda5 ro quiet")));
        assert!(p.match_options(&entry(v, "root=/dev/vg/root ro rd.lvm.lv=vg/root")));
        // Fixed word missing
        assert!(!p.match_options(&entry(v, "root=/dev/sda5 rw")));
        // No templated word
        assert!(!p.match_options(&entry(v, "ro quiet")));
        assert!(p.match_kernel(&entry(v, "quiet")));
        assert!(!p.match_uname_version(v));
    }

    #[test]
    fn test_match_order() {
        let mut set = ProfileSet::default();
        let mut zeta = OsProfile::new("Zeta", "zeta", "1", "1").unwrap();
        zeta.uname_pattern = "fc".into();
        let zeta = set.add_os(zeta);
        let mut beta = OsProfile::new("Beta", "beta", "1", "1").unwrap();
        beta.uname_pattern = "fc36".into();
        let beta = set.add_os(beta);
        let mut gamma = OsProfile::new("Gamma", "gamma", "1", "1").unwrap();
        gamma.options = "root=%{root_device} rw".into();
        let gamma = set.add_os(gamma);

        // Uname patterns are tried in name order
        let e = entry("5.18.0-1.fc36.x86_64", "root=/dev/sda5 rw");
        assert_eq!(set.match_entry(&e).unwrap().os_id, beta.os_id);
        let e = entry("5.18.0-1.fc35.x86_64", "root=/dev/sda5 rw");
        assert_eq!(set.match_entry(&e).unwrap().os_id, zeta.os_id);
        // Then options templates
        let e = entry("5.14.0-70.el9.x86_64", "root=/dev/sda5 rw");
        assert_eq!(set.match_entry(&e).unwrap().os_id, gamma.os_id);
        // Then kernel image paths, in load order
        let e = entry("5.14.0-70.el9.x86_64", "quiet");
        assert_eq!(set.match_entry(&e).unwrap().os_id, zeta.os_id);
    }

    #[test]
    fn test_display_os_id() {
        let mut set = ProfileSet::default();
        let p = set.add_os(OsProfile::new("Fedora", "fedora", "36", "36").unwrap());
        assert_eq!(set.display_os_id(&p.os_id), p.os_id[..7]);

        // Identifiers read from disk are not necessarily hex
        let odd = OsProfile::from_json(indoc! { r#"
            {
                "os_id": "ééééééééé",
                "os_name": "Odd",
                "os_short_name": "odd",
                "os_version": "1",
                "os_version_id": "1"
            }
        "# })
        .unwrap();
        let odd = set.add_os(odd);
        assert_eq!(set.display_os_id(&odd.os_id), "ééééééé");
    }
}
