//! Content identifiers.

use openssl::sha::Sha1;

/// Length of a full hex identifier.
pub(crate) const ID_LEN: usize = 40;

/// Compute the hex encoded SHA-1 digest of the concatenation of `parts`.
pub(crate) fn sha1_hex<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finish())
}

/// Compute the shortest prefix length, no less than `min`, at which
/// every identifier in `ids` is distinct from every other.
pub(crate) fn min_unique_prefix<'a>(ids: impl IntoIterator<Item = &'a str>, min: usize) -> usize {
    let mut ids = ids.into_iter().collect::<Vec<_>>();
    ids.sort_unstable();
    ids.dedup();
    let shared = ids
        .windows(2)
        .map(|w| {
            w[0].chars()
                .zip(w[1].chars())
                .take_while(|(a, b)| a == b)
                .count()
        })
        .max()
        .unwrap_or(0);
    (shared + 1).max(min).min(ID_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1() {
        assert_eq!(sha1_hex([""]), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(sha1_hex(["ab", "c"]), sha1_hex(["abc"]));
        assert_eq!(sha1_hex(["abc"]), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_min_unique_prefix() {
        assert_eq!(min_unique_prefix(Vec::<&str>::new(), 7), 7);
        assert_eq!(min_unique_prefix(["abcdef0123", "1234567890"], 7), 7);
        assert_eq!(min_unique_prefix(["abcdef0123", "abcdef0923"], 7), 8);
        // Exact duplicates do not force a full length prefix
        assert_eq!(min_unique_prefix(["abcdef0123", "abcdef0123"], 7), 7);
    }
}
