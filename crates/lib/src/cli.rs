//! # Command line interface
//!
//! Command line tool to manage BootLoader Specification boot entries.

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{ArgAction, Args, Parser, Subcommand};
use comfy_table::{presets::NOTHING, Table};

use crate::bootparams::{BootParams, BootParamsOpts};
use crate::config::{BoomConfig, BOOT_PATH_VAR, DEFAULT_BOOT_PATH};
use crate::entry::{BootEntry, EntryField};
use crate::profile::{Profile, ProfileSet};
use crate::selection::Selection;
use crate::store::{EntryEdit, EntryStore};

/// Where the local machine id is read from by default.
const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Criteria selecting boot entries
#[derive(Debug, Default, Args, PartialEq, Eq)]
pub struct SelectionOpts {
    /// Boot entry identifier, or a unique prefix of it
    #[clap(long, short = 'b')]
    pub boot_id: Option<String>,

    /// Exact entry title
    #[clap(long)]
    pub title: Option<String>,

    /// Exact kernel version
    #[clap(long)]
    pub version: Option<String>,

    /// Exact machine id
    #[clap(long)]
    pub machine_id: Option<String>,

    /// OS profile identifier, or a prefix of it
    #[clap(long)]
    pub os_id: Option<String>,

    /// Exact root device
    #[clap(long)]
    pub root_device: Option<String>,

    /// Exact root logical volume, as vg/lv
    #[clap(long)]
    pub root_lv: Option<String>,

    /// Exact btrfs subvolume path
    #[clap(long)]
    pub btrfs_subvol_path: Option<String>,

    /// Exact btrfs subvolume id
    #[clap(long)]
    pub btrfs_subvol_id: Option<String>,
}

impl From<SelectionOpts> for Selection {
    fn from(o: SelectionOpts) -> Self {
        Selection {
            boot_id: o.boot_id,
            title: o.title,
            version: o.version,
            machine_id: o.machine_id,
            os_id: o.os_id,
            root_device: o.root_device,
            lvm_root_lv: o.root_lv,
            btrfs_subvol_path: o.btrfs_subvol_path,
            btrfs_subvol_id: o.btrfs_subvol_id,
        }
    }
}

/// Root device and kernel option arguments
#[derive(Debug, Default, Args, PartialEq, Eq)]
pub struct ParamOpts {
    /// The root device, e.g. /dev/sda5 or UUID=...
    #[clap(long)]
    pub root_device: Option<String>,

    /// The root logical volume, as vg/lv
    #[clap(long)]
    pub root_lv: Option<String>,

    /// The btrfs subvolume path to mount as root
    #[clap(long, conflicts_with = "btrfs_subvol_id")]
    pub btrfs_subvol_path: Option<String>,

    /// The btrfs subvolume id to mount as root
    #[clap(long)]
    pub btrfs_subvol_id: Option<String>,

    /// Kernel options to add, space separated
    #[clap(long, short = 'a')]
    pub add_opts: Option<String>,

    /// Kernel options to delete, space separated; `name=` deletes
    /// every value of `name`
    #[clap(long, short = 'd')]
    pub del_opts: Option<String>,

    /// Don't check that the root device exists
    #[clap(long)]
    pub no_dev: bool,
}

fn split_opts(opts: Option<&str>) -> Vec<String> {
    opts.map(|o| o.split_whitespace().map(ToOwned::to_owned).collect())
        .unwrap_or_default()
}

/// Arguments for creating an entry
#[derive(Debug, Args, PartialEq, Eq)]
pub struct CreateOpts {
    /// The entry title; generated from the profile if omitted
    #[clap(long, short = 't')]
    pub title: Option<String>,

    /// The kernel version
    #[clap(long)]
    pub version: String,

    /// The machine id; defaults to the contents of /etc/machine-id
    #[clap(long)]
    pub machine_id: Option<String>,

    /// The OS profile identifier, or a unique prefix of it
    #[clap(long, short = 'p')]
    pub profile: Option<String>,

    /// The kernel image path, if not generated from the profile
    #[clap(long)]
    pub linux: Option<String>,

    /// The initramfs image path, if not generated from the profile
    #[clap(long)]
    pub initrd: Option<String>,

    #[clap(flatten)]
    #[allow(missing_docs)]
    pub params: ParamOpts,
}

/// Arguments for editing or cloning an entry
#[derive(Debug, Args, PartialEq, Eq)]
pub struct EditOpts {
    /// The boot entry identifier, or a unique prefix of it
    pub boot_id: String,

    /// New entry title
    #[clap(long, short = 't')]
    pub title: Option<String>,

    /// New kernel version
    #[clap(long)]
    pub version: Option<String>,

    /// New machine id
    #[clap(long)]
    pub machine_id: Option<String>,

    /// OS profile identifier to attach
    #[clap(long, short = 'p')]
    pub profile: Option<String>,

    #[clap(flatten)]
    #[allow(missing_docs)]
    pub params: ParamOpts,
}

/// Boot entry operations
#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum EntryCmd {
    /// List boot entries
    List(SelectionOpts),
    /// Show boot entries in BLS format
    Show(SelectionOpts),
    /// Create a boot entry
    Create(CreateOpts),
    /// Delete the selected boot entries
    Delete(SelectionOpts),
    /// Modify a boot entry
    Edit(EditOpts),
    /// Copy a boot entry, applying modifications to the copy
    Clone(EditOpts),
}

/// Profile operations
#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum ProfileCmd {
    /// List OS profiles
    List,
}

/// Top level subcommands
#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Cmd {
    /// Manage boot entries
    #[clap(subcommand)]
    Entry(EntryCmd),
    /// Manage OS profiles
    #[clap(subcommand)]
    Profile(ProfileCmd),
}

/// Manage BootLoader Specification boot entries.
#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = "boom", version)]
pub struct Opt {
    /// Increase logging verbosity
    #[clap(long, short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// The boot file system mount point
    #[clap(long, env = BOOT_PATH_VAR, global = true, default_value = DEFAULT_BOOT_PATH)]
    pub boot_dir: Utf8PathBuf,

    #[clap(subcommand)]
    #[allow(missing_docs)]
    pub cmd: Cmd,
}

/// Loaded configuration, profiles and entries.
#[derive(Debug)]
struct Boom {
    profiles: ProfileSet,
    store: EntryStore,
}

impl Boom {
    fn open(opt: &Opt) -> Result<Self> {
        let config = BoomConfig::load(&opt.boot_dir)?;
        tracing::debug!("Using configuration {config:?}");
        let profiles = ProfileSet::load(&config.profiles_dir(), &config.hosts_dir())?;
        let mut store = EntryStore::new(&config.entries_dir());
        store.set_check_root_device(!config.allow_no_dev);
        store.load(&profiles)?;
        Ok(Self { profiles, store })
    }

    fn find_profile(&self, os_id: Option<&str>, machine_id: &str) -> Result<Option<Arc<dyn Profile>>> {
        let Some(os_id) = os_id else {
            return Ok(None);
        };
        let os = self.profiles.find_os(os_id)?;
        Ok(self.profiles.resolve(machine_id, Some(os)))
    }
}

fn local_machine_id() -> Result<String> {
    let id = std::fs::read_to_string(MACHINE_ID_PATH)
        .with_context(|| format!("Reading {MACHINE_ID_PATH}"))?;
    Ok(id.trim().to_owned())
}

fn list_entries(boom: &Boom, selection: &Selection) {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_header(["BootID", "Version", "Name", "RootDevice"]);
    for entry in boom.store.find(selection) {
        let boot_id = entry.boot_id();
        let bp = entry.boot_params();
        table.add_row([
            boom.store.display_id(&boot_id).to_owned(),
            entry.version().unwrap_or_default(),
            entry
                .profile()
                .map(|p| p.os_name().to_owned())
                .unwrap_or_default(),
            bp.and_then(|bp| bp.root_device())
                .unwrap_or_default()
                .to_owned(),
        ]);
    }
    println!("{table}");
}

fn show_entries(boom: &Boom, selection: &Selection) {
    for (i, entry) in boom.store.find(selection).into_iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("Boot Entry (boot_id={})", boom.store.display_id(&entry.boot_id()));
        print!("{}", entry.to_bls_string());
    }
}

fn create_entry(boom: &mut Boom, opts: CreateOpts) -> Result<()> {
    let machine_id = match opts.machine_id {
        Some(m) => m,
        None => local_machine_id()?,
    };
    let profile = boom.find_profile(opts.profile.as_deref(), &machine_id)?;
    let p = opts.params;
    let bp = BootParams::new(
        &opts.version,
        BootParamsOpts {
            root_device: p.root_device,
            lvm_root_lv: p.root_lv,
            btrfs_subvol_path: p.btrfs_subvol_path,
            btrfs_subvol_id: p.btrfs_subvol_id,
            add_opts: split_opts(p.add_opts.as_deref()),
            del_opts: split_opts(p.del_opts.as_deref()),
        },
    )?;
    if bp.root_device().is_none() {
        anyhow::bail!("One of --root-device or --root-lv is required");
    }
    let mut entry = BootEntry::new(opts.title.as_deref(), &machine_id, profile, Some(bp))?;
    for (field, value) in [(EntryField::Linux, opts.linux), (EntryField::Initrd, opts.initrd)] {
        if let Some(value) = value {
            entry.set(field, &value)?;
        }
    }
    if p.no_dev {
        boom.store.set_check_root_device(false);
    }
    let id = boom.store.create_entry(entry)?;
    println!("Created entry with boot_id {}", boom.store.display_id(&id));
    Ok(())
}

fn make_edit(boom: &Boom, opts: &EditOpts) -> Result<EntryEdit> {
    let machine_id = match opts.machine_id.as_deref() {
        Some(m) => m.to_owned(),
        None => boom
            .store
            .get(&opts.boot_id)?
            .machine_id()
            .unwrap_or_default(),
    };
    let p = &opts.params;
    Ok(EntryEdit {
        title: opts.title.clone(),
        version: opts.version.clone(),
        machine_id: opts.machine_id.clone(),
        profile: boom.find_profile(opts.profile.as_deref(), &machine_id)?,
        root_device: p.root_device.clone(),
        lvm_root_lv: p.root_lv.clone(),
        btrfs_subvol_path: p.btrfs_subvol_path.clone(),
        btrfs_subvol_id: p.btrfs_subvol_id.clone(),
        add_opts: split_opts(p.add_opts.as_deref()),
        del_opts: split_opts(p.del_opts.as_deref()),
    })
}

fn run_entry(boom: &mut Boom, cmd: EntryCmd) -> Result<()> {
    match cmd {
        EntryCmd::List(sel) => list_entries(boom, &sel.into()),
        EntryCmd::Show(sel) => show_entries(boom, &sel.into()),
        EntryCmd::Create(opts) => create_entry(boom, opts)?,
        EntryCmd::Delete(sel) => {
            let n = boom.store.delete_entries(&sel.into())?;
            println!("Deleted {n} entr{}", if n == 1 { "y" } else { "ies" });
        }
        EntryCmd::Edit(opts) => {
            let edit = make_edit(boom, &opts)?;
            if opts.params.no_dev {
                boom.store.set_check_root_device(false);
            }
            let id = boom.store.edit_entry(&opts.boot_id, &edit)?;
            println!("Edited entry, boot_id now {}", boom.store.display_id(&id));
        }
        EntryCmd::Clone(opts) => {
            let edit = make_edit(boom, &opts)?;
            if opts.params.no_dev {
                boom.store.set_check_root_device(false);
            }
            let id = boom.store.clone_entry(&opts.boot_id, &edit)?;
            println!("Cloned entry with boot_id {}", boom.store.display_id(&id));
        }
    }
    Ok(())
}

fn list_profiles(boom: &Boom) {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_header(["OsID", "Name", "OsVersion"]);
    for p in boom.profiles.os_profiles() {
        table.add_row([
            boom.profiles.display_os_id(&p.os_id),
            p.os_name.clone(),
            p.os_version.clone(),
        ]);
    }
    println!("{table}");
}

/// Parse the provided arguments and execute.
pub fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    run_from_opt(Opt::parse_from(args))
}

/// Execute parsed arguments.
pub fn run_from_opt(opt: Opt) -> Result<()> {
    boom_utils::initialize_tracing(opt.verbose);
    let mut boom = Boom::open(&opt)?;
    match opt.cmd {
        Cmd::Entry(cmd) => run_entry(&mut boom, cmd),
        Cmd::Profile(ProfileCmd::List) => {
            list_profiles(&boom);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let o = Opt::try_parse_from(["boom", "-vv", "entry", "list", "--version", "1.1.1"]).unwrap();
        assert_eq!(o.verbose, 2);
        let Cmd::Entry(EntryCmd::List(sel)) = o.cmd else {
            panic!("unexpected {:?}", o.cmd);
        };
        let sel = Selection::from(sel);
        assert_eq!(sel.version.as_deref(), Some("1.1.1"));
        assert!(sel.title.is_none());
    }

    #[test]
    fn test_parse_create() {
        let o = Opt::try_parse_from([
            "boom",
            "--boot-dir",
            "/mnt/boot",
            "entry",
            "create",
            "--version",
            "5.18.0-1.fc36.x86_64",
            "--root-lv",
            "vg00/root",
            "-a",
            "debug quiet",
        ])
        .unwrap();
        assert_eq!(o.boot_dir, "/mnt/boot");
        let Cmd::Entry(EntryCmd::Create(c)) = o.cmd else {
            panic!("unexpected {:?}", o.cmd);
        };
        assert_eq!(c.version, "5.18.0-1.fc36.x86_64");
        assert_eq!(c.params.root_lv.as_deref(), Some("vg00/root"));
        assert_eq!(split_opts(c.params.add_opts.as_deref()), ["debug", "quiet"]);
    }

    #[test]
    fn test_parse_conflicts() {
        assert!(Opt::try_parse_from([
            "boom",
            "entry",
            "edit",
            "abc",
            "--btrfs-subvol-path",
            "/x",
            "--btrfs-subvol-id",
            "5",
        ])
        .is_err());
        assert!(Opt::try_parse_from(["boom", "entry", "create"]).is_err());
    }

    #[test]
    fn test_create_and_list() {
        let td = tempfile::tempdir().unwrap();
        let boot = camino::Utf8Path::from_path(td.path()).unwrap();
        let args = |extra: &[&str]| {
            let mut v = vec!["boom", "--boot-dir", boot.as_str(), "entry"];
            v.extend_from_slice(extra);
            Opt::try_parse_from(v).unwrap()
        };
        std::fs::create_dir_all(boot.join("loader/entries")).unwrap();
        run_from_opt(args(&[
            "create",
            "--title",
            "Test",
            "--version",
            "1.1.1.x86_64",
            "--machine-id",
            "ffffffff",
            "--root-device",
            "/dev/sda5",
            "--linux",
            "/vmlinuz-1.1.1.x86_64",
            "--no-dev",
        ]))
        .unwrap();
        run_from_opt(args(&["list"])).unwrap();

        let opt = args(&["list"]);
        let boom = Boom::open(&opt).unwrap();
        assert_eq!(boom.store.len(), 1);
        let id = boom.store.entries().next().unwrap().boot_id();

        run_from_opt(args(&["edit", &id[..7], "--title", "Edited", "--no-dev"])).unwrap();
        let boom = Boom::open(&opt).unwrap();
        let e = boom.store.entries().next().unwrap();
        assert_eq!(e.title().as_deref(), Some("Edited"));

        run_from_opt(args(&["delete", "--title", "Edited"])).unwrap();
        let boom = Boom::open(&opt).unwrap();
        assert!(boom.store.is_empty());
    }
}
