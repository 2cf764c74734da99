//! UTF-8 kernel command line tokenization.

use std::borrow::Cow;
use std::ops::Deref;

/// A kernel command line.
///
/// Wraps the raw command line text and provides methods for iterating
/// over individual parameters. Uses copy-on-write semantics to avoid
/// unnecessary allocations when working with borrowed data.
#[derive(Clone, Debug, Default)]
pub struct Cmdline<'a>(Cow<'a, str>);

/// An owned `Cmdline`.  Alias for `Cmdline<'static>`.
pub type CmdlineOwned = Cmdline<'static>;

impl<'a, T: AsRef<str> + ?Sized> From<&'a T> for Cmdline<'a> {
    /// Creates a new `Cmdline` from any type that can be referenced as `str`.
    ///
    /// Uses borrowed data when possible to avoid unnecessary allocations.
    fn from(input: &'a T) -> Self {
        Self(Cow::Borrowed(input.as_ref()))
    }
}

impl From<String> for CmdlineOwned {
    /// Creates a new `Cmdline` from a `String`.
    fn from(input: String) -> Self {
        Self(Cow::Owned(input))
    }
}

/// An iterator over kernel command line parameters.
///
/// This is created by the `iter` method on `Cmdline`.
#[derive(Debug)]
pub struct CmdlineIter<'a>(&'a str);

impl<'a> Iterator for CmdlineIter<'a> {
    type Item = Parameter<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (param, rest) = Parameter::parse_one(self.0);
        self.0 = rest;
        param
    }
}

impl Cmdline<'_> {
    /// Creates a new empty owned `Cmdline`.
    pub fn new() -> CmdlineOwned {
        CmdlineOwned::default()
    }

    /// Returns an iterator over all parameters in the command line.
    ///
    /// Properly handles quoted values containing whitespace and splits on
    /// unquoted whitespace characters.
    pub fn iter(&self) -> CmdlineIter<'_> {
        CmdlineIter(&self.0)
    }

    /// Returns an iterator over the raw text of each parameter.
    pub fn iter_str(&self) -> impl Iterator<Item = &str> + '_ {
        self.iter().map(|p| p.raw)
    }

    /// Locate a kernel argument with the given key name.
    ///
    /// Returns the first parameter matching the given key, or `None` if not found.
    /// Key comparison treats dashes and underscores as equivalent.
    pub fn find<T: AsRef<str> + ?Sized>(&self, key: &T) -> Option<Parameter<'_>> {
        let key = ParameterKey::from(key.as_ref());
        self.iter().find(|p| p.key() == key)
    }

    /// Locate the value of the kernel argument with the given key name.
    pub fn value_of<T: AsRef<str> + ?Sized>(&self, key: &T) -> Option<&str> {
        self.find(key).and_then(|p| p.value)
    }

    /// Append a raw parameter string to the end of the command line.
    ///
    /// Empty or whitespace-only input is ignored.
    pub fn push(&mut self, param: &str) {
        let param = param.trim();
        if param.is_empty() {
            return;
        }
        let s = self.0.to_mut();
        s.truncate(s.trim_end().len());
        if !s.is_empty() {
            s.push(' ');
        }
        s.push_str(param);
    }

    /// Keep only the parameters for which `f` returns `true`.
    ///
    /// The retained parameters are re-joined with a single space.
    /// Returns `true` if any parameter was dropped.
    pub fn retain(&mut self, mut f: impl FnMut(&Parameter) -> bool) -> bool {
        let mut dropped = false;
        let kept = self
            .iter()
            .filter(|p| {
                let keep = f(p);
                dropped |= !keep;
                keep
            })
            .map(|p| p.raw)
            .collect::<Vec<_>>()
            .join(" ");
        self.0 = Cow::Owned(kept);
        dropped
    }

    /// Consume the command line returning its normalized text: every
    /// parameter separated by exactly one space.
    pub fn into_normalized(self) -> String {
        self.iter_str().collect::<Vec<_>>().join(" ")
    }
}

impl Deref for Cmdline<'_> {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for Cmdline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'a> IntoIterator for &'a Cmdline<'_> {
    type Item = Parameter<'a>;
    type IntoIter = CmdlineIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A single kernel command line parameter key
///
/// Treats dashes and underscores in keys as equivalent.
#[derive(Clone, Copy, Debug, Eq)]
pub struct ParameterKey<'a>(&'a str);

impl<'a> ParameterKey<'a> {
    /// The key text exactly as it appears on the command line.
    pub fn as_str(&self) -> &'a str {
        self.0
    }
}

impl<'a, T: AsRef<str> + ?Sized> From<&'a T> for ParameterKey<'a> {
    fn from(input: &'a T) -> Self {
        Self(input.as_ref())
    }
}

impl Deref for ParameterKey<'_> {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl PartialEq for ParameterKey<'_> {
    /// Keys are compared with dashes and underscores treated as equivalent.
    /// This comparison is case-sensitive.
    fn eq(&self, other: &Self) -> bool {
        let dedashed = |c: char| if c == '-' { '_' } else { c };
        // Not zip(): leading substrings would compare equal.
        self.0.chars().map(dedashed).eq(other.0.chars().map(dedashed))
    }
}

impl std::fmt::Display for ParameterKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// A single kernel command line parameter.
#[derive(Clone, Copy, Debug, Eq)]
pub struct Parameter<'a> {
    /// The complete parameter text, including any quotes
    raw: &'a str,
    key: ParameterKey<'a>,
    value: Option<&'a str>,
}

impl<'a> Parameter<'a> {
    /// Attempt to parse a single command line parameter.
    ///
    /// Returns `None` if the input is empty or contains only whitespace.
    /// Anything after the first parameter is ignored.
    pub fn parse<T: AsRef<str> + ?Sized>(input: &'a T) -> Option<Self> {
        Self::parse_one(input.as_ref()).0
    }

    /// Parse one parameter, returning it along with the unconsumed input.
    fn parse_one(input: &'a str) -> (Option<Self>, &'a str) {
        let input = input.trim_start();

        if input.is_empty() {
            return (None, input);
        }

        let mut in_quotes = false;
        let end = input
            .char_indices()
            .find(|&(_, c)| {
                if c == '"' {
                    in_quotes = !in_quotes;
                }
                !in_quotes && c.is_whitespace()
            })
            .map(|(i, _)| i)
            .unwrap_or(input.len());

        let (raw, rest) = input.split_at(end);

        let ret = match raw.split_once('=') {
            None => Self {
                raw,
                key: ParameterKey(raw.trim_matches('"')),
                value: None,
            },
            Some((key, value)) => {
                let key = key.strip_prefix('"').unwrap_or(key);
                // *Only* the first and last double quotes are stripped
                let value = value.strip_prefix('"').unwrap_or(value);
                let value = value.strip_suffix('"').unwrap_or(value);
                Self {
                    raw,
                    key: ParameterKey(key),
                    value: Some(value),
                }
            }
        };

        (Some(ret), rest)
    }

    /// Returns the key part of the parameter
    pub fn key(&self) -> ParameterKey<'a> {
        self.key
    }

    /// Returns the optional value part of the parameter
    pub fn value(&self) -> Option<&'a str> {
        self.value
    }

    /// The parameter text exactly as it appeared in the command line.
    pub fn as_str(&self) -> &'a str {
        self.raw
    }
}

impl PartialEq for Parameter<'_> {
    fn eq(&self, other: &Self) -> bool {
        // Not comparing `raw`: keys are dash/underscore insensitive
        self.key == other.key && self.value == other.value
    }
}

impl Deref for Parameter<'_> {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.raw
    }
}

impl std::fmt::Display for Parameter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // convenience method for tests
    fn param(s: &str) -> Parameter<'_> {
        Parameter::parse(s).unwrap()
    }

    #[test]
    fn test_parameter_parse() {
        let p = Parameter::parse("foo").unwrap();
        assert_eq!(p.key(), "foo".into());
        assert_eq!(p.value(), None);

        // should parse only the first parameter and discard the rest of the input
        let p = Parameter::parse("foo=bar baz").unwrap();
        assert_eq!(p.key(), "foo".into());
        assert_eq!(p.value(), Some("bar"));

        // should return None on empty or whitespace inputs
        assert!(Parameter::parse("").is_none());
        assert!(Parameter::parse("   ").is_none());
    }

    #[test]
    fn test_parameter_quoted() {
        let p = param("foo=\"quoted value\"");
        assert_eq!(p.value(), Some("quoted value"));
        assert_eq!(p.as_str(), "foo=\"quoted value\"");

        let p = param("foo=\"unclosed quotes");
        assert_eq!(p.value(), Some("unclosed quotes"));

        let outside_quoted = param("\"foo=quoted value\"");
        let value_quoted = param("foo=\"quoted value\"");
        assert_eq!(outside_quoted, value_quoted);
    }

    #[test]
    fn test_parameter_display() {
        // Always the original data without modification
        assert_eq!(param("foo").to_string(), "foo");
        assert_eq!(param("\"foo\"").to_string(), "\"foo\"");
    }

    #[test]
    fn test_parameter_equality() {
        // substrings are not equal
        assert_ne!(param("foo"), param("foobar"));
        assert_ne!(param("foobar"), param("foo"));

        // dashes and underscores are treated equally
        assert_eq!(param("a-delimited-param"), param("a_delimited_param"));

        // same key, different values is not equal
        assert_ne!(param("rd.lvm.lv=vg/a"), param("rd.lvm.lv=vg/b"));

        // mixed variants are never equal
        assert_ne!(param("same_key"), param("same_key=but_with_a_value"));
    }

    #[test]
    fn test_kargs_simple() {
        let kargs = Cmdline::from("root=/dev/sda5 ro rd.lvm.lv=vg00/lvol0 rhgb");
        let mut iter = kargs.iter();

        assert_eq!(iter.next(), Some(param("root=/dev/sda5")));
        assert_eq!(iter.next(), Some(param("ro")));
        assert_eq!(iter.next(), Some(param("rd.lvm.lv=vg00/lvol0")));
        assert_eq!(iter.next(), Some(param("rhgb")));
        assert_eq!(iter.next(), None);

        assert_eq!(kargs.value_of("root"), Some("/dev/sda5"));
        assert_eq!(kargs.value_of("rhgb"), None);
        assert!(kargs.find("nothing").is_none());
    }

    #[test]
    fn test_kargs_extra_whitespace() {
        let kargs = Cmdline::from("  foo=bar    baz=fuz  wiz   ");
        assert_eq!(kargs.iter_str().collect::<Vec<_>>(), ["foo=bar", "baz=fuz", "wiz"]);
        assert_eq!(kargs.into_normalized(), "foo=bar baz=fuz wiz");
    }

    #[test]
    fn test_kargs_quoted_whitespace() {
        let kargs = Cmdline::from("a \"b=c d\" e");
        assert_eq!(kargs.iter_str().collect::<Vec<_>>(), ["a", "\"b=c d\"", "e"]);
    }

    #[test]
    fn test_push() {
        let mut kargs = Cmdline::new();
        kargs.push("quiet");
        kargs.push("  ");
        kargs.push("splash");
        assert_eq!(&*kargs, "quiet splash");

        let mut kargs = Cmdline::from("ro ");
        kargs.push("debug");
        assert_eq!(&*kargs, "ro debug");
    }

    #[test]
    fn test_retain() {
        let mut kargs = Cmdline::from("a=1 b  c=3");
        assert!(kargs.retain(|p| p.key().as_str() != "b"));
        assert_eq!(&*kargs, "a=1 c=3");
        assert!(!kargs.retain(|_| true));
        assert_eq!(&*kargs, "a=1 c=3");
    }
}
