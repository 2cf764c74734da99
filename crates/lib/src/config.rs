//! Configuration file handling.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde::{Deserialize, Serialize};

/// The default boot file system mount point.
pub const DEFAULT_BOOT_PATH: &str = "/boot";
/// The environment variable overriding the boot path.
pub const BOOT_PATH_VAR: &str = "BOOM_BOOT_PATH";
/// Location of the configuration file relative to the boot path.
const CONFIG_PATH: &str = "boom/boom.toml";

/// Global configuration, read from `<boot>/boom/boom.toml`.
///
/// Relative directories are resolved against `boot_path`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct BoomConfig {
    /// The boot file system mount point
    pub boot_path: Utf8PathBuf,
    /// The BLS entry directory
    pub entries: Utf8PathBuf,
    /// The OS profile directory
    pub profiles: Utf8PathBuf,
    /// The host profile directory
    pub hosts: Utf8PathBuf,
    /// Skip checking that root devices exist
    pub allow_no_dev: bool,
}

impl Default for BoomConfig {
    fn default() -> Self {
        Self {
            boot_path: DEFAULT_BOOT_PATH.into(),
            entries: "loader/entries".into(),
            profiles: "boom/profiles".into(),
            hosts: "boom/hosts".into(),
            allow_no_dev: false,
        }
    }
}

impl BoomConfig {
    /// Load the configuration under `boot_path`, falling back to the
    /// defaults if there is no configuration file.
    #[context("Loading configuration")]
    pub fn load(boot_path: &Utf8Path) -> Result<Self> {
        let path = boot_path.join(CONFIG_PATH);
        let mut r = match std::fs::read_to_string(&path) {
            Ok(buf) => {
                toml::from_str::<Self>(&buf).with_context(|| format!("Parsing {path}"))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No configuration at {path}");
                Self::default()
            }
            Err(e) => return Err(e).with_context(|| format!("Reading {path}")),
        };
        // The directory we were asked to use wins over the file
        r.boot_path = boot_path.to_owned();
        Ok(r)
    }

    fn resolve(&self, p: &Utf8Path) -> Utf8PathBuf {
        self.boot_path.join(p)
    }

    /// The absolute BLS entry directory
    pub fn entries_dir(&self) -> Utf8PathBuf {
        self.resolve(&self.entries)
    }

    /// The absolute OS profile directory
    pub fn profiles_dir(&self) -> Utf8PathBuf {
        self.resolve(&self.profiles)
    }

    /// The absolute host profile directory
    pub fn hosts_dir(&self) -> Utf8PathBuf {
        self.resolve(&self.hosts)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_defaults() {
        let c = BoomConfig::load(Utf8Path::new("/nonexistent/boot")).unwrap();
        assert_eq!(c.boot_path, "/nonexistent/boot");
        assert_eq!(c.entries_dir(), "/nonexistent/boot/loader/entries");
        assert_eq!(c.profiles_dir(), "/nonexistent/boot/boom/profiles");
        assert!(!c.allow_no_dev);
    }

    #[test]
    fn test_load() {
        let td = tempfile::tempdir().unwrap();
        let boot = Utf8Path::from_path(td.path()).unwrap();
        std::fs::create_dir(boot.join("boom")).unwrap();
        std::fs::write(
            boot.join(CONFIG_PATH),
            indoc! { r#"
                entries = "/efi/loader/entries"
                allow_no_dev = true
            "# },
        )
        .unwrap();
        let c = BoomConfig::load(boot).unwrap();
        assert_eq!(c.entries_dir(), "/efi/loader/entries");
        assert_eq!(c.hosts_dir(), boot.join("boom/hosts"));
        assert!(c.allow_no_dev);

        std::fs::write(boot.join(CONFIG_PATH), "bogus = 1\n").unwrap();
        assert!(BoomConfig::load(boot).is_err());
    }
}
