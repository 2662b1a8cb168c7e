//! Ordering of dotted plugin versions.
//!
//! Versions compare segment by segment. Each segment compares by the integer
//! value of its leading digits; segments without leading digits, or whose
//! numbers tie, compare as whole strings. When every compared segment ties,
//! the version with more segments is newer, so `1.2 < 1.2.0`.

use std::cmp::Ordering;

/// Compares two dotted version strings.
///
/// # Example
///
/// ```
/// use std::cmp::Ordering;
///
/// use embulk_plugins::version::compare_versions;
///
/// assert_eq!(compare_versions("1.9", "1.10"), Ordering::Less);
/// assert_eq!(compare_versions("1.2.0", "1.2"), Ordering::Greater);
/// ```
#[must_use]
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let mut left_segments = left.split('.');
    let mut right_segments = right.split('.');
    loop {
        match (left_segments.next(), right_segments.next()) {
            (Some(l), Some(r)) => {
                let ordering = compare_segments(l, r);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (None, None) => return Ordering::Equal,
        }
    }
}

/// Compares optional versions; an absent version sorts lowest.
#[must_use]
pub fn compare_optional_versions(left: Option<&str>, right: Option<&str>) -> Ordering {
    match (left, right) {
        (Some(l), Some(r)) => compare_versions(l, r),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

fn compare_segments(left: &str, right: &str) -> Ordering {
    match (leading_number(left), leading_number(right)) {
        (Some(l), Some(r)) if l != r => l.cmp(&r),
        _ => left.cmp(right),
    }
}

// Digit runs too long for u128 fall back to string comparison.
fn leading_number(segment: &str) -> Option<u128> {
    let end = segment
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(segment.len());
    segment.get(..end).filter(|digits| !digits.is_empty())?.parse().ok()
}
