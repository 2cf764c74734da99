//! Criteria for selecting boot entries.

use crate::entry::BootEntry;

/// A set of criteria an entry must all satisfy. Unset criteria match
/// anything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    /// A prefix of the boot_id
    pub boot_id: Option<String>,
    /// The exact title
    pub title: Option<String>,
    /// The exact kernel version
    pub version: Option<String>,
    /// The exact machine id
    pub machine_id: Option<String>,
    /// A prefix of the attached OS profile's identifier
    pub os_id: Option<String>,
    /// The exact root device
    pub root_device: Option<String>,
    /// The exact root logical volume
    pub lvm_root_lv: Option<String>,
    /// The exact btrfs subvolume path
    pub btrfs_subvol_path: Option<String>,
    /// The exact btrfs subvolume id
    pub btrfs_subvol_id: Option<String>,
}

fn exact(want: &Option<String>, have: Option<&str>) -> bool {
    want.as_deref().is_none_or(|w| have == Some(w))
}

impl Selection {
    /// Select the entry whose boot_id starts with `boot_id`.
    pub fn from_boot_id(boot_id: &str) -> Self {
        Self {
            boot_id: Some(boot_id.to_owned()),
            ..Default::default()
        }
    }

    /// Whether no criteria are set.
    pub fn is_null(&self) -> bool {
        *self == Self::default()
    }

    /// Whether `entry` satisfies every criterion.
    pub fn matches(&self, entry: &BootEntry) -> bool {
        if let Some(prefix) = self.boot_id.as_deref() {
            if !entry.boot_id().starts_with(prefix) {
                return false;
            }
        }
        if let Some(prefix) = self.os_id.as_deref() {
            if !entry.profile().is_some_and(|p| p.os_id().starts_with(prefix)) {
                return false;
            }
        }
        let bp = entry.boot_params();
        exact(&self.title, entry.title().as_deref())
            && exact(&self.version, entry.version().as_deref())
            && exact(&self.machine_id, entry.machine_id().as_deref())
            && exact(&self.root_device, bp.and_then(|bp| bp.root_device()))
            && exact(&self.lvm_root_lv, bp.and_then(|bp| bp.lvm_root_lv()))
            && exact(
                &self.btrfs_subvol_path,
                bp.and_then(|bp| bp.btrfs_subvol_path()),
            )
            && exact(&self.btrfs_subvol_id, bp.and_then(|bp| bp.btrfs_subvol_id()))
    }
}
