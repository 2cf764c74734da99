//! The collection of boot entries in an entry directory.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

use crate::bootparams::{BootParams, BootParamsOpts};
use crate::device::check_root_device;
use crate::digest::min_unique_prefix;
use crate::entry::{BootEntry, EntryField, ENTRY_SUFFIX};
use crate::error::Error;
use crate::profile::{Profile, ProfileSet};
use crate::selection::Selection;

/// The shortest boot_id prefix shown to users.
pub const MIN_DISPLAY_ID: usize = 7;

/// Changes to apply when editing or cloning an entry.
///
/// Unset fields are left alone. Options to add and delete are appended
/// to the entry's existing lists.
#[derive(Clone, Debug, Default)]
pub struct EntryEdit {
    /// New title
    pub title: Option<String>,
    /// New kernel version
    pub version: Option<String>,
    /// New machine id
    pub machine_id: Option<String>,
    /// Profile to attach
    pub profile: Option<Arc<dyn Profile>>,
    /// New root device
    pub root_device: Option<String>,
    /// New root logical volume
    pub lvm_root_lv: Option<String>,
    /// New btrfs subvolume path
    pub btrfs_subvol_path: Option<String>,
    /// New btrfs subvolume id
    pub btrfs_subvol_id: Option<String>,
    /// Options to add
    pub add_opts: Vec<String>,
    /// Option specs to delete
    pub del_opts: Vec<String>,
}

impl EntryEdit {
    fn changes_params(&self) -> bool {
        self.root_device.is_some()
            || self.lvm_root_lv.is_some()
            || self.btrfs_subvol_path.is_some()
            || self.btrfs_subvol_id.is_some()
            || !self.add_opts.is_empty()
            || !self.del_opts.is_empty()
    }

    fn apply(&self, entry: &mut BootEntry) -> Result<()> {
        if let Some(profile) = self.profile.as_ref() {
            entry.set_profile(Some(Arc::clone(profile)));
        }
        if let Some(title) = self.title.as_deref() {
            entry.set_title(title)?;
        }
        if let Some(machine_id) = self.machine_id.as_deref() {
            entry.set(EntryField::MachineId, machine_id)?;
        }
        if let Some(version) = self.version.as_deref() {
            entry.set_version(version)?;
        }
        if !self.changes_params() {
            return Ok(());
        }
        if entry.boot_params().is_none() {
            let version = entry.version().ok_or(Error::MissingField("version"))?;
            entry.set_boot_params(Some(BootParams::new(&version, BootParamsOpts::default())?));
        }
        let Some(bp) = entry.boot_params_mut() else {
            return Ok(());
        };
        // Clear the conflicting selector first so switching between them works
        if let Some(path) = self.btrfs_subvol_path.as_ref() {
            bp.set_btrfs_subvol_id(None)?;
            bp.set_btrfs_subvol_path(Some(path.clone()))?;
        }
        if let Some(id) = self.btrfs_subvol_id.as_ref() {
            bp.set_btrfs_subvol_path(None)?;
            bp.set_btrfs_subvol_id(Some(id.clone()))?;
        }
        if let Some(lv) = self.lvm_root_lv.as_ref() {
            bp.set_lvm_root_lv(Some(lv.clone()));
            if self.root_device.is_none() {
                bp.set_root_device(Some(format!("/dev/{lv}")));
            }
        }
        if let Some(root) = self.root_device.as_ref() {
            bp.set_root_device(Some(root.clone()));
        }
        if !self.add_opts.is_empty() {
            bp.extend_add_opts(self.add_opts.iter().cloned());
        }
        if !self.del_opts.is_empty() {
            bp.extend_del_opts(self.del_opts.iter().cloned());
        }
        Ok(())
    }
}

/// The boot entries of one entry directory, indexed by boot_id.
#[derive(Debug)]
pub struct EntryStore {
    dir: Utf8PathBuf,
    entries: BTreeMap<String, BootEntry>,
    check_root_device: bool,
}

impl EntryStore {
    /// An empty store for `dir`.
    pub fn new(dir: &Utf8Path) -> Self {
        Self {
            dir: dir.to_owned(),
            entries: BTreeMap::new(),
            check_root_device: true,
        }
    }

    /// The entry directory
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Enable or disable checking root devices when writing entries.
    pub fn set_check_root_device(&mut self, check: bool) {
        self.check_root_device = check;
    }

    /// Replace the store's contents with the entries found on disk.
    ///
    /// Entries that fail to load, and duplicates of entries already
    /// loaded, are logged and skipped. Returns the number of entries.
    #[context("Loading boot entries")]
    pub fn load(&mut self, profiles: &ProfileSet) -> Result<usize> {
        self.clear();
        let dir = match self.dir.read_dir_utf8() {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No entry directory {}", self.dir);
                return Ok(0);
            }
            Err(e) => return Err(e).with_context(|| format!("Reading {}", self.dir)),
        };
        let mut paths = Vec::new();
        for dent in dir {
            let dent = dent?;
            if dent.file_name().ends_with(ENTRY_SUFFIX) {
                paths.push(dent.path().to_owned());
            }
        }
        paths.sort();
        for path in paths {
            let entry = match BootEntry::from_file(&path, profiles, None) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Skipping {path}: {e:#}");
                    continue;
                }
            };
            let id = entry.boot_id();
            if self.entries.contains_key(&id) {
                tracing::warn!("Skipping duplicate entry {path} (boot_id {id})");
                continue;
            }
            self.entries.insert(id, entry);
        }
        tracing::debug!("Loaded {} entries from {}", self.entries.len(), self.dir);
        Ok(self.entries.len())
    }

    /// Forget every loaded entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The number of loaded entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are loaded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The loaded entries in boot_id order.
    pub fn entries(&self) -> impl Iterator<Item = &BootEntry> {
        self.entries.values()
    }

    /// The entries matching `selection`.
    pub fn find(&self, selection: &Selection) -> Vec<&BootEntry> {
        self.entries
            .values()
            .filter(|e| selection.matches(e))
            .collect()
    }

    fn resolve_id(&self, prefix: &str) -> Result<String> {
        let mut found = self.entries.keys().filter(|id| id.starts_with(prefix));
        match (found.next(), found.next()) {
            (Some(id), None) if !prefix.is_empty() => Ok(id.clone()),
            (Some(_), Some(_)) => anyhow::bail!("Ambiguous boot_id '{prefix}'"),
            _ => anyhow::bail!("No boot entry matching boot_id '{prefix}'"),
        }
    }

    /// The single entry whose boot_id starts with `prefix`.
    pub fn get(&self, prefix: &str) -> Result<&BootEntry> {
        let id = self.resolve_id(prefix)?;
        self.entries
            .get(&id)
            .ok_or_else(|| anyhow::anyhow!("No boot entry matching boot_id '{prefix}'"))
    }

    /// The length of boot_id prefixes that tell all loaded entries apart.
    pub fn display_width(&self) -> usize {
        min_unique_prefix(self.entries.keys().map(String::as_str), MIN_DISPLAY_ID)
    }

    /// The shortened boot_id shown to users.
    pub fn display_id<'a>(&self, boot_id: &'a str) -> &'a str {
        let width = self.display_width().min(boot_id.len());
        &boot_id[..width]
    }

    /// Add an already written entry.
    pub fn insert(&mut self, entry: BootEntry) -> Result<()> {
        let id = entry.boot_id();
        if self.entries.contains_key(&id) {
            return Err(Error::DuplicateEntry(id).into());
        }
        self.entries.insert(id, entry);
        Ok(())
    }

    fn validate(&self, entry: &BootEntry) -> Result<()> {
        if !self.check_root_device {
            return Ok(());
        }
        match entry.boot_params().and_then(|bp| bp.root_device()) {
            Some(root) if !root.is_empty() => check_root_device(root),
            _ => Ok(()),
        }
    }

    /// Write a new entry and add it to the store. Returns its boot_id.
    pub fn create_entry(&mut self, mut entry: BootEntry) -> Result<String> {
        let id = entry.boot_id();
        if self.entries.contains_key(&id) {
            return Err(Error::DuplicateEntry(id).into());
        }
        self.validate(&entry)?;
        entry.write(&self.dir, true)?;
        tracing::info!("Created entry {id}");
        self.entries.insert(id.clone(), entry);
        Ok(id)
    }

    /// Apply `edit` to the entry matching `prefix` and rewrite it,
    /// removing the old file if its name changed. Returns the new boot_id.
    pub fn edit_entry(&mut self, prefix: &str, edit: &EntryEdit) -> Result<String> {
        let old_id = self.resolve_id(prefix)?;
        let mut entry = self.get(&old_id)?.clone();
        edit.apply(&mut entry)?;
        let new_id = entry.boot_id();
        if new_id != old_id && self.entries.contains_key(&new_id) {
            return Err(Error::DuplicateEntry(new_id).into());
        }
        self.validate(&entry)?;
        entry.update(&self.dir)?;
        self.entries.remove(&old_id);
        self.entries.insert(new_id.clone(), entry);
        tracing::info!("Edited entry {old_id} => {new_id}");
        Ok(new_id)
    }

    /// Write a copy of the entry matching `prefix` with `edit` applied.
    /// Returns the copy's boot_id.
    pub fn clone_entry(&mut self, prefix: &str, edit: &EntryEdit) -> Result<String> {
        let old_id = self.resolve_id(prefix)?;
        let mut entry = self.get(&old_id)?.clone();
        edit.apply(&mut entry)?;
        let new_id = entry.boot_id();
        if self.entries.contains_key(&new_id) {
            return Err(Error::DuplicateEntry(new_id).into());
        }
        self.validate(&entry)?;
        entry.write(&self.dir, true)?;
        self.entries.insert(new_id.clone(), entry);
        tracing::info!("Cloned entry {old_id} => {new_id}");
        Ok(new_id)
    }

    /// Delete the entries matching `selection`, returning how many were
    /// removed from the store.
    ///
    /// Every matching entry leaves the store even if removing its file
    /// fails; the first such failure is returned.
    pub fn delete_entries(&mut self, selection: &Selection) -> Result<usize> {
        if selection.is_null() {
            anyhow::bail!("Refusing to delete entries with empty selection");
        }
        let ids = self
            .entries
            .iter()
            .filter(|(_, e)| selection.matches(e))
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        let mut first_err = None;
        for id in &ids {
            let Some(entry) = self.entries.remove(id) else {
                continue;
            };
            if let Err(e) = entry.delete(&self.dir) {
                tracing::warn!("Deleting {id}: {e:#}");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(ids.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::OsProfile;

    fn tmpdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let td = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(td.path()).unwrap().to_owned();
        (td, path)
    }

    fn new_store(dir: &Utf8Path) -> EntryStore {
        let mut store = EntryStore::new(dir);
        store.set_check_root_device(false);
        store
    }

    fn entry(title: &str, version: &str) -> BootEntry {
        let bp = BootParams::new(
            version,
            BootParamsOpts {
                root_device: Some("/dev/sda5".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let mut e = BootEntry::new(Some(title), "ffffffff", None, Some(bp)).unwrap();
        e.set(EntryField::Linux, &format!("/vmlinuz-{version}"))
            .unwrap();
        e
    }

    #[test]
    fn test_create_and_load() {
        let (_td, dir) = tmpdir();
        let profiles = ProfileSet::default();
        let mut store = new_store(&dir);
        assert_eq!(store.load(&profiles).unwrap(), 0);

        let e = entry("title", "1.1.1.x86_64");
        let (title, version) = (e.title(), e.version());
        let id = store.create_entry(e).unwrap();
        let e = entry("title", "1.1.1.x86_64");
        let err = store.create_entry(e).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::DuplicateEntry(_))
        ));
        store.create_entry(entry("other", "1.1.2.x86_64")).unwrap();
        std::fs::write(dir.join("garbage.conf"), "nonsense here\n").unwrap();

        let mut fresh = new_store(&dir);
        assert_eq!(fresh.load(&profiles).unwrap(), 2);
        let loaded = fresh.get(&id[..MIN_DISPLAY_ID]).unwrap();
        assert_eq!(loaded.title(), title);
        assert_eq!(loaded.version(), version);
        assert_eq!(loaded.boot_id(), id);
        assert!(fresh.display_width() >= MIN_DISPLAY_ID);
        assert_eq!(fresh.display_id(&id).len(), fresh.display_width());

        let found = fresh.find(&Selection {
            version: Some("1.1.2.x86_64".into()),
            ..Default::default()
        });
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title().as_deref(), Some("other"));
        assert!(fresh.get("").is_err());
    }

    #[test]
    fn test_edit_entry() {
        let (_td, dir) = tmpdir();
        let mut store = new_store(&dir);
        let id = store.create_entry(entry("title", "1.1.1.x86_64")).unwrap();
        let old_path = store.get(&id).unwrap().last_path().unwrap().to_owned();

        // An edit that changes nothing keeps the file
        let same = store.edit_entry(&id, &EntryEdit::default()).unwrap();
        assert_eq!(same, id);
        assert!(old_path.exists());

        let edit = EntryEdit {
            title: Some("edited".into()),
            add_opts: vec!["debug".into()],
            del_opts: vec!["quiet".into()],
            ..Default::default()
        };
        let new_id = store.edit_entry(&id[..MIN_DISPLAY_ID], &edit).unwrap();
        assert_ne!(new_id, id);
        assert!(!old_path.exists());
        let edited = store.get(&new_id).unwrap();
        assert!(edited.last_path().unwrap().exists());
        assert_eq!(edited.title().as_deref(), Some("edited"));
        assert_eq!(edited.options().as_deref(), Some("debug"));
        assert_eq!(store.len(), 1);
        assert!(store.get(&id).is_err());
    }

    #[test]
    fn test_edit_add_then_delete() {
        let (_td, dir) = tmpdir();
        let mut store = new_store(&dir);
        let id = store.create_entry(entry("title", "1.1.1.x86_64")).unwrap();
        let edit = EntryEdit {
            add_opts: vec!["console=ttyS0".into(), "debug".into()],
            del_opts: vec!["console=".into()],
            ..Default::default()
        };
        let id = store.edit_entry(&id, &edit).unwrap();
        assert_eq!(store.get(&id).unwrap().options().as_deref(), Some("debug"));
    }

    #[test]
    fn test_clone_entry() {
        let (_td, dir) = tmpdir();
        let mut profiles = ProfileSet::default();
        let osp = profiles.add_os(OsProfile::new("Fedora", "fedora", "36", "36").unwrap());
        let mut store = new_store(&dir);
        let bp = BootParams::new(
            "5.18.0-1.fc36.x86_64",
            BootParamsOpts {
                root_device: Some("/dev/sda5".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let e = BootEntry::new(None, "ffffffff", Some(osp), Some(bp)).unwrap();
        let id = store.create_entry(e).unwrap();

        let err = store.clone_entry(&id, &EntryEdit::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::DuplicateEntry(_))
        ));

        let edit = EntryEdit {
            lvm_root_lv: Some("vg00/lvol0".into()),
            ..Default::default()
        };
        let clone_id = store.clone_entry(&id, &edit).unwrap();
        assert_ne!(clone_id, id);
        let clone = store.get(&clone_id).unwrap();
        assert_eq!(
            clone.options().as_deref(),
            Some("root=/dev/vg00/lvol0 ro rd.lvm.lv=vg00/lvol0")
        );

        let mut fresh = new_store(&dir);
        assert_eq!(fresh.load(&profiles).unwrap(), 2);
        let reloaded = fresh.get(&clone_id).unwrap();
        assert_eq!(
            reloaded.boot_params().unwrap().lvm_root_lv(),
            Some("vg00/lvol0")
        );
    }

    #[test]
    fn test_delete_entries() {
        let (_td, dir) = tmpdir();
        let mut store = new_store(&dir);
        let id = store.create_entry(entry("title", "1.1.1.x86_64")).unwrap();
        store.create_entry(entry("other", "1.1.2.x86_64")).unwrap();
        assert!(store.delete_entries(&Selection::default()).is_err());

        let sel = Selection::from_boot_id(&id);
        // Remove the file behind the store's back
        let path = store.get(&id).unwrap().last_path().unwrap().to_owned();
        std::fs::remove_file(&path).unwrap();
        let err = store.delete_entries(&sel).unwrap_err();
        assert!(matches!(
            err.root_cause().downcast_ref::<Error>(),
            Some(Error::EntryNotFound(_))
        ));
        // Still dropped from the index
        assert_eq!(store.len(), 1);
        assert_eq!(store.delete_entries(&sel).unwrap(), 0);

        let sel = Selection {
            title: Some("other".into()),
            ..Default::default()
        };
        assert_eq!(store.delete_entries(&sel).unwrap(), 1);
        assert!(store.is_empty());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_root_device_check() {
        let (_td, dir) = tmpdir();
        let mut store = EntryStore::new(&dir);
        let bp = BootParams::new(
            "1.1.1.x86_64",
            BootParamsOpts {
                root_device: Some("/nonexistent/root".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let mut e = BootEntry::new(Some("t"), "ffffffff", None, Some(bp)).unwrap();
        e.set(EntryField::Linux, "/vmlinuz").unwrap();
        let err = store.create_entry(e.clone()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::RootDeviceMissing(_))
        ));
        store.set_check_root_device(false);
        store.create_entry(e).unwrap();
    }
}
