//! Canonical URL order.
//!
//! Vote and hash blocks are listed in pre-order traversal order of the
//! content tree: URLs compare byte-wise, except that `/` sorts before any
//! other byte, so a directory's children come right after the directory
//! itself. A proper prefix sorts before the longer URL.

use std::cmp::Ordering;

/// Compare two URLs in canonical (pre-order) order.
pub fn compare_urls(a: &str, b: &str) -> Ordering {
    for (x, y) in a.bytes().zip(b.bytes()) {
        if x != y {
            if x == b'/' {
                return Ordering::Less;
            }
            if y == b'/' {
                return Ordering::Greater;
            }
            return x.cmp(&y);
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_sorts_before_other_bytes() {
        // '.' (0x2e) is below '/' (0x2f) in ASCII, but pre-order puts '/' first.
        assert_eq!(
            compare_urls("http://x.org/a/b", "http://x.org/a.html"),
            Ordering::Less
        );
        assert_eq!(
            compare_urls("http://x.org/a.html", "http://x.org/a/b"),
            Ordering::Greater
        );
    }

    #[test]
    fn prefix_sorts_first() {
        assert_eq!(compare_urls("http://x.org/a", "http://x.org/a/"), Ordering::Less);
        assert_eq!(compare_urls("http://x.org/a", "http://x.org/a"), Ordering::Equal);
    }
}
