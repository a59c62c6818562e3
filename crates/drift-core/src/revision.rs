//! Ordering for dotted numeric revision strings

use std::cmp::Ordering;

/// Compare two revision strings such as `1.2.3`.
///
/// Segments are compared as integers left to right; when one string is a
/// prefix of the other the shorter one orders first, so `2` < `2.0` and
/// `1.2` < `1.10`. An absent or empty revision orders before any present
/// one. Non-numeric segments compare as 0.
pub fn compare_revisions(a: Option<&str>, b: Option<&str>) -> Ordering {
    let a = a.filter(|s| !s.is_empty());
    let b = b.filter(|s| !s.is_empty());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let left = segments(a);
            let right = segments(b);
            for (l, r) in left.iter().zip(right.iter()) {
                match l.cmp(r) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            left.len().cmp(&right.len())
        }
    }
}

fn segments(s: &str) -> Vec<u64> {
    s.split('.')
        .map(|seg| {
            seg.parse::<u64>().unwrap_or_else(|_| {
                tracing::debug!(segment = seg, "non-numeric revision segment, treating as 0");
                0
            })
        })
        .collect()
}
