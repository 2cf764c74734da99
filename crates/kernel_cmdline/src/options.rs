//! Reconciling a generated option string with option add/delete lists.
//!
//! A boot entry's kernel options are produced from a template, then
//! adjusted by two lists: options to append, and option specs to
//! remove. Additions are applied before deletions so that a deletion
//! spec also cancels a matching addition.

use crate::{Cmdline, Parameter};

/// A specification of kernel options to remove.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionSpec<'a> {
    /// Remove parameters whose full text is exactly this string, such as
    /// `rhgb` or `console=ttyS0`.
    Exact(&'a str),
    /// Remove every parameter with this key, whatever its value. Written
    /// as `name=`.
    Name(&'a str),
}

impl<'a> OptionSpec<'a> {
    /// Parse a deletion spec. A trailing `=` with nothing after it selects
    /// all values of that key.
    pub fn parse(spec: &'a str) -> Self {
        let spec = spec.trim();
        match spec.strip_suffix('=') {
            Some(name) if !name.is_empty() && !name.contains('=') => Self::Name(name),
            _ => Self::Exact(spec),
        }
    }

    /// Whether `param` is selected by this spec.
    pub fn matches(&self, param: &Parameter) -> bool {
        match *self {
            Self::Exact(s) => param.as_str() == s,
            Self::Name(name) => param.key().as_str() == name,
        }
    }
}

impl std::fmt::Display for OptionSpec<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(s) => f.write_str(s),
            Self::Name(name) => write!(f, "{name}="),
        }
    }
}

/// Append `add` to `base`, then drop every parameter selected by an
/// entry in `del`.
///
/// The result has its parameters separated by single spaces.
pub fn apply_add_del<A, D>(base: &str, add: &[A], del: &[D]) -> String
where
    A: AsRef<str>,
    D: AsRef<str>,
{
    let mut cmdline = Cmdline::from(base);
    for opt in add {
        cmdline.push(opt.as_ref());
    }

    let specs = del
        .iter()
        .map(|d| d.as_ref())
        .filter(|d| !d.trim().is_empty())
        .map(OptionSpec::parse)
        .collect::<Vec<_>>();

    if !specs.is_empty() {
        cmdline.retain(|p| {
            let hit = specs.iter().find(|s| s.matches(p));
            if let Some(spec) = hit {
                tracing::trace!("Dropping option '{p}' (matched '{spec}')");
            }
            hit.is_none()
        });
    }

    cmdline.into_normalized()
}
