//! Root device validation.

use anyhow::{Context, Result};
use camino::Utf8Path;
use rustix::fs::FileType;
use rustix::io::Errno;

use crate::error::Error;

/// Check that `root_device` names an existing block device.
///
/// Device specifiers that are not paths, such as `UUID=...`, are not
/// checked.
pub fn check_root_device(root_device: &str) -> Result<()> {
    if !root_device.starts_with('/') {
        tracing::debug!("Not checking root device specifier {root_device}");
        return Ok(());
    }
    let path = Utf8Path::new(root_device);
    let st = match rustix::fs::stat(path.as_std_path()) {
        Ok(st) => st,
        Err(e) if e == Errno::NOENT => return Err(Error::RootDeviceMissing(path.to_owned()).into()),
        Err(e) => return Err(e).with_context(|| format!("Querying {path}")),
    };
    if FileType::from_raw_mode(st.st_mode) != FileType::BlockDevice {
        return Err(Error::RootDeviceNotBlock(path.to_owned()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(r: Result<()>) -> Option<String> {
        r.err()
            .and_then(|e| e.downcast_ref::<Error>().map(|e| format!("{e:?}")))
    }

    #[test]
    fn test_check_root_device() {
        assert!(check_root_device("UUID=1234").is_ok());
        assert!(check_root_device("").is_ok());
        assert!(kind(check_root_device("/nonexistent/device"))
            .unwrap()
            .starts_with("RootDeviceMissing"));
        // A character device
        assert!(kind(check_root_device("/dev/null"))
            .unwrap()
            .starts_with("RootDeviceNotBlock"));
        assert!(kind(check_root_device("/"))
            .unwrap()
            .starts_with("RootDeviceNotBlock"));
    }
}
