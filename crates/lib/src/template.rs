//! Expansion of `%{key}` placeholders in profile patterns.
//!
//! Each [`FormatKey`] has a [`Rule`] listing the sources that may supply
//! its value, in priority order. The first source that yields a value
//! wins; if none does, the placeholder is left in the output verbatim.
//! An empty value still counts and clears the placeholder.
//!
//! The same chain structure drives the templated [`BootEntry`] fields
//! (see [`field_value`]), and the placeholder syntax is inverted by
//! [`make_format_regexes`] to recover values from a literal options
//! string.

use std::fmt::Display;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::bootparams::BootParams;
use crate::entry::{BootEntry, EntryField};
use crate::profile::Profile;

/// Nesting limit for templates that expand other templates.
const MAX_DEPTH: usize = 4;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\{([A-Za-z0-9_]+)\}").expect("valid placeholder regex"));

/// A placeholder name usable in profile patterns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormatKey {
    /// `%{version}`
    Version,
    /// `%{lvm_root_lv}`
    LvmRootLv,
    /// `%{btrfs_subvolume}`: `subvolid=<id>` or `subvol=<path>`
    BtrfsSubvolume,
    /// `%{btrfs_subvol_path}`
    BtrfsSubvolPath,
    /// `%{btrfs_subvol_id}`
    BtrfsSubvolId,
    /// `%{root_device}`
    RootDevice,
    /// `%{root_opts}`: the root options that apply to the entry's layout
    RootOpts,
    /// `%{root_opts_lvm2}`
    RootOptsLvm2,
    /// `%{root_opts_btrfs}`
    RootOptsBtrfs,
    /// `%{kernel}`
    Kernel,
    /// `%{initramfs}`
    Initramfs,
    /// `%{os_name}`
    OsName,
    /// `%{os_short_name}`
    OsShortName,
    /// `%{os_version}`
    OsVersion,
    /// `%{os_version_id}`
    OsVersionId,
}

impl FormatKey {
    /// Every key, in declaration order.
    pub const ALL: [FormatKey; 15] = [
        Self::Version,
        Self::LvmRootLv,
        Self::BtrfsSubvolume,
        Self::BtrfsSubvolPath,
        Self::BtrfsSubvolId,
        Self::RootDevice,
        Self::RootOpts,
        Self::RootOptsLvm2,
        Self::RootOptsBtrfs,
        Self::Kernel,
        Self::Initramfs,
        Self::OsName,
        Self::OsShortName,
        Self::OsVersion,
        Self::OsVersionId,
    ];

    /// The name written between `%{` and `}`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::LvmRootLv => "lvm_root_lv",
            Self::BtrfsSubvolume => "btrfs_subvolume",
            Self::BtrfsSubvolPath => "btrfs_subvol_path",
            Self::BtrfsSubvolId => "btrfs_subvol_id",
            Self::RootDevice => "root_device",
            Self::RootOpts => "root_opts",
            Self::RootOptsLvm2 => "root_opts_lvm2",
            Self::RootOptsBtrfs => "root_opts_btrfs",
            Self::Kernel => "kernel",
            Self::Initramfs => "initramfs",
            Self::OsName => "os_name",
            Self::OsShortName => "os_short_name",
            Self::OsVersion => "os_version",
            Self::OsVersionId => "os_version_id",
        }
    }

    /// Look up a key by placeholder name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Keys whose value can be recovered from a matching option word.
    fn is_capturing(self) -> bool {
        matches!(
            self,
            Self::Version
                | Self::LvmRootLv
                | Self::BtrfsSubvolPath
                | Self::BtrfsSubvolId
                | Self::RootDevice
        )
    }

    fn rule(self) -> &'static Rule {
        match self {
            Self::Version => &VERSION,
            Self::LvmRootLv => &LVM_ROOT_LV,
            Self::BtrfsSubvolume => &BTRFS_SUBVOLUME,
            Self::BtrfsSubvolPath => &BTRFS_SUBVOL_PATH,
            Self::BtrfsSubvolId => &BTRFS_SUBVOL_ID,
            Self::RootDevice => &ROOT_DEVICE,
            Self::RootOpts => &ROOT_OPTS,
            Self::RootOptsLvm2 => &ROOT_OPTS_LVM2,
            Self::RootOptsBtrfs => &ROOT_OPTS_BTRFS,
            Self::Kernel => &KERNEL,
            Self::Initramfs => &INITRAMFS,
            Self::OsName => &OS_NAME,
            Self::OsShortName => &OS_SHORT_NAME,
            Self::OsVersion => &OS_VERSION,
            Self::OsVersionId => &OS_VERSION_ID,
        }
    }
}

impl Display for FormatKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A place a value can come from.
#[derive(Clone, Copy)]
enum Source {
    /// An untemplated field of the entry itself.
    Literal(EntryField),
    /// A computed value of the entry; takes the current nesting depth.
    Entry(fn(&BootEntry, usize) -> Option<String>),
    /// An attribute of the boot params.
    Params(fn(&BootParams) -> Option<String>),
    /// A descriptive attribute of the attached profile.
    Profile(fn(&dyn Profile) -> &str),
    /// A pattern of the attached profile, itself expanded.
    Template(fn(&dyn Profile) -> &str),
}

#[derive(Clone, Copy)]
struct Candidate {
    source: Source,
    needs_params: bool,
    guard: Option<fn(&BootParams) -> bool>,
}

impl Candidate {
    const fn new(source: Source) -> Self {
        Self {
            source,
            needs_params: false,
            guard: None,
        }
    }

    const fn needs_params(mut self) -> Self {
        self.needs_params = true;
        self
    }

    const fn guarded(mut self, guard: fn(&BootParams) -> bool) -> Self {
        self.guard = Some(guard);
        self
    }

    fn resolve(&self, entry: &BootEntry, depth: usize) -> Option<String> {
        let bp = entry.boot_params();
        if self.needs_params && bp.is_none() {
            return None;
        }
        if let Some(guard) = self.guard {
            if !bp.is_some_and(guard) {
                return None;
            }
        }
        match self.source {
            Source::Literal(field) => entry.literal(field).map(str::to_owned),
            Source::Entry(f) => f(entry, depth),
            Source::Params(f) => bp.and_then(f),
            Source::Profile(f) => entry.profile().map(|p| f(p.as_ref()).to_owned()),
            Source::Template(f) => {
                let profile = entry.profile()?;
                Some(expand(entry, f(profile.as_ref()), depth + 1))
            }
        }
    }
}

/// An ordered chain of candidate sources.
struct Rule(&'static [Candidate]);

impl Rule {
    fn resolve(&self, entry: &BootEntry, depth: usize) -> Option<String> {
        self.0.iter().find_map(|c| c.resolve(entry, depth))
    }
}

static VERSION: Rule = Rule(&[
    Candidate::new(Source::Literal(EntryField::Version)),
    Candidate::new(Source::Params(|bp| Some(bp.version().to_owned()))),
]);
static LVM_ROOT_LV: Rule = Rule(&[Candidate::new(Source::Params(|bp| {
    bp.lvm_root_lv().map(str::to_owned)
}))
.needs_params()]);
static BTRFS_SUBVOLUME: Rule = Rule(&[Candidate::new(Source::Params(
    BootParams::btrfs_subvolume,
))
.guarded(BootParams::has_btrfs)]);
static BTRFS_SUBVOL_PATH: Rule = Rule(&[Candidate::new(Source::Params(|bp| {
    bp.btrfs_subvol_path().map(str::to_owned)
}))
.needs_params()]);
static BTRFS_SUBVOL_ID: Rule = Rule(&[Candidate::new(Source::Params(|bp| {
    bp.btrfs_subvol_id().map(str::to_owned)
}))
.needs_params()]);
static ROOT_DEVICE: Rule = Rule(&[Candidate::new(Source::Params(|bp| {
    bp.root_device().map(str::to_owned)
}))
.needs_params()]);
static ROOT_OPTS: Rule = Rule(&[Candidate::new(Source::Entry(root_opts))]);
static ROOT_OPTS_LVM2: Rule = Rule(&[Candidate::new(Source::Template(|p| p.root_opts_lvm2()))]);
static ROOT_OPTS_BTRFS: Rule = Rule(&[Candidate::new(Source::Template(|p| p.root_opts_btrfs()))]);
static KERNEL: Rule = Rule(&[Candidate::new(Source::Entry(|e, depth| {
    field_value(e, EntryField::Linux, depth + 1)
}))
.needs_params()]);
static INITRAMFS: Rule = Rule(&[Candidate::new(Source::Entry(|e, depth| {
    field_value(e, EntryField::Initrd, depth + 1)
}))
.needs_params()]);
static OS_NAME: Rule = Rule(&[Candidate::new(Source::Profile(|p| p.os_name()))]);
static OS_SHORT_NAME: Rule = Rule(&[Candidate::new(Source::Profile(|p| p.os_short_name()))]);
static OS_VERSION: Rule = Rule(&[Candidate::new(Source::Profile(|p| p.os_version()))]);
static OS_VERSION_ID: Rule = Rule(&[Candidate::new(Source::Profile(|p| p.os_version_id()))]);

static TITLE_FIELD: Rule = Rule(&[
    Candidate::new(Source::Literal(EntryField::Title)),
    Candidate::new(Source::Template(|p| p.title())),
]);
static LINUX_FIELD: Rule = Rule(&[
    Candidate::new(Source::Literal(EntryField::Linux)),
    Candidate::new(Source::Template(|p| p.kernel_pattern())).needs_params(),
]);
static INITRD_FIELD: Rule = Rule(&[
    Candidate::new(Source::Literal(EntryField::Initrd)),
    Candidate::new(Source::Template(|p| p.initramfs_pattern())).needs_params(),
]);
static OPTIONS_FIELD: Rule = Rule(&[
    Candidate::new(Source::Template(|p| p.options())).needs_params(),
    Candidate::new(Source::Literal(EntryField::Options)),
]);

/// The value of the `%{root_opts}` key: the LVM2 and btrfs root option
/// templates that apply to the entry's boot params, expanded and joined.
///
/// Empty when there is no profile to supply the templates.
pub(crate) fn root_opts(entry: &BootEntry, depth: usize) -> Option<String> {
    let bp = entry.boot_params()?;
    let Some(profile) = entry.profile() else {
        return Some(String::new());
    };
    let mut opts = Vec::new();
    if bp.has_lvm2() {
        opts.push(expand(entry, profile.root_opts_lvm2(), depth + 1));
    }
    if bp.has_btrfs() {
        opts.push(expand(entry, profile.root_opts_btrfs(), depth + 1));
    }
    let opts = opts
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .collect::<Vec<_>>();
    Some(opts.join(" "))
}

/// Resolve the effective value of an entry field.
///
/// Title, version, linux, initrd and options may be generated from the
/// attached profile and boot params; every other field is literal.
/// Options are further reconciled against the profile's and the boot
/// params' add and delete lists.
pub(crate) fn field_value(entry: &BootEntry, field: EntryField, depth: usize) -> Option<String> {
    if depth > MAX_DEPTH {
        tracing::warn!("Template nesting too deep resolving {field}");
        return None;
    }
    match field {
        EntryField::Title => TITLE_FIELD.resolve(entry, depth),
        EntryField::Version => VERSION.resolve(entry, depth),
        EntryField::Linux => LINUX_FIELD.resolve(entry, depth),
        EntryField::Initrd => INITRD_FIELD.resolve(entry, depth),
        EntryField::Options => {
            let base = OPTIONS_FIELD.resolve(entry, depth);
            let Some(bp) = entry.boot_params() else {
                return base;
            };
            let (mut add, mut del) = match entry.profile() {
                Some(p) => (p.add_opts().to_vec(), p.del_opts().to_vec()),
                None => (Vec::new(), Vec::new()),
            };
            add.extend_from_slice(bp.add_opts());
            del.extend_from_slice(bp.del_opts());
            if base.is_none() && add.is_empty() {
                return None;
            }
            let base = base.unwrap_or_default();
            Some(boom_kernel_cmdline::apply_add_del(&base, &add, &del))
        }
        EntryField::BootId => Some(entry.boot_id()),
        _ => entry.literal(field).map(str::to_owned),
    }
}

fn expand(entry: &BootEntry, pattern: &str, depth: usize) -> String {
    if depth > MAX_DEPTH {
        tracing::warn!("Template nesting too deep expanding '{pattern}'");
        return pattern.to_owned();
    }
    PLACEHOLDER
        .replace_all(pattern, |caps: &Captures| {
            let value = FormatKey::from_name(&caps[1]).and_then(|key| {
                let v = key.rule().resolve(entry, depth);
                if v.is_none() {
                    tracing::trace!("No value for %{{{key}}}");
                }
                v
            });
            value.unwrap_or_else(|| caps[0].to_owned())
        })
        .into_owned()
}

/// Expand the `%{key}` placeholders in `pattern` using `entry`, its
/// boot params and its attached profile.
///
/// Unknown keys, and keys with no available value, are left as is.
pub fn apply_format(entry: &BootEntry, pattern: &str) -> String {
    expand(entry, pattern, 0)
}

/// A matcher for one word of an options template.
#[derive(Clone, Debug)]
pub struct OptionRegex {
    key: Option<FormatKey>,
    name: String,
    word: String,
    regex: Regex,
}

impl OptionRegex {
    /// The key whose value is captured by group 1, if any.
    pub fn key(&self) -> Option<FormatKey> {
        self.key
    }

    /// The option name: the template word up to the first `=`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The template word this was derived from.
    pub fn word(&self) -> &str {
        &self.word
    }

    /// The anchored regex.
    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// The delete spec that removes this option from generated options.
    pub fn del_spec(&self) -> String {
        if self.key.is_some() {
            format!("{}=", self.name)
        } else {
            self.word.clone()
        }
    }
}

/// The two shapes a `%{btrfs_subvolume}` value can take, each with its
/// own capturing key.
const SUBVOLUME_FORMS: [&str; 2] = ["subvol=%{btrfs_subvol_path}", "subvolid=%{btrfs_subvol_id}"];

fn placeholder(key: FormatKey) -> String {
    format!("%{{{key}}}")
}

/// Derive one matcher per word of the `options` template.
///
/// A word containing `%{root_opts}` stands for the words of both root
/// option templates, and `%{root_opts_lvm2}`/`%{root_opts_btrfs}` for the
/// words of one. A word containing `%{btrfs_subvolume}` yields one matcher
/// per subvolume form. The first capturing key in a word becomes capture
/// group 1; any other placeholders match an arbitrary run of
/// non-whitespace.
pub fn make_format_regexes(
    options: &str,
    root_opts_lvm2: &str,
    root_opts_btrfs: &str,
) -> Result<Vec<OptionRegex>> {
    let root_opts = placeholder(FormatKey::RootOpts);
    let lvm2_opts = placeholder(FormatKey::RootOptsLvm2);
    let btrfs_opts = placeholder(FormatKey::RootOptsBtrfs);
    let mut expanded = Vec::new();
    for word in options.split_whitespace() {
        if word.contains(&root_opts) {
            expanded.extend(root_opts_lvm2.split_whitespace());
            expanded.extend(root_opts_btrfs.split_whitespace());
        } else if word.contains(&lvm2_opts) {
            expanded.extend(root_opts_lvm2.split_whitespace());
        } else if word.contains(&btrfs_opts) {
            expanded.extend(root_opts_btrfs.split_whitespace());
        } else {
            expanded.push(word);
        }
    }

    let subvolume = placeholder(FormatKey::BtrfsSubvolume);
    let mut words = Vec::new();
    for word in expanded {
        if word.contains(&subvolume) {
            words.extend(SUBVOLUME_FORMS.iter().map(|f| word.replace(&subvolume, f)));
        } else {
            words.push(word.to_owned());
        }
    }

    words
        .into_iter()
        .map(|word| {
            let word = word.as_str();
            let name = word.split_once('=').map_or(word, |(name, _)| name);
            let mut key = None;
            let mut pattern = String::from("^");
            let mut last = 0;
            for caps in PLACEHOLDER.captures_iter(word) {
                let Some(m) = caps.get(0) else {
                    continue;
                };
                pattern.push_str(&regex::escape(&word[last..m.start()]));
                match FormatKey::from_name(&caps[1]).filter(|k| k.is_capturing()) {
                    Some(k) if key.is_none() => {
                        key = Some(k);
                        pattern.push_str(if k == FormatKey::BtrfsSubvolId {
                            r"(\d+)"
                        } else {
                            r"(\S*)"
                        });
                    }
                    _ => pattern.push_str(r"\S*"),
                }
                last = m.end();
            }
            pattern.push_str(&regex::escape(&word[last..]));
            pattern.push('$');
            let regex = Regex::new(&pattern)
                .with_context(|| format!("Compiling matcher for option template '{word}'"))?;
            tracing::trace!("Option template '{word}' => {pattern}");
            Ok(OptionRegex {
                key,
                name: name.to_owned(),
                word: word.to_owned(),
                regex,
            })
        })
        .collect()
}
