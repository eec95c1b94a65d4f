//! Materialized-path helpers.
//!
//! Every tree level contributes one fixed-width base-36 segment to a
//! node's path, so a node at depth `d` has a path of exactly
//! `d * STEP_LEN` characters. Ancestor paths are strict prefixes of
//! descendant paths, which turns tree queries into indexed prefix
//! matches. The alphabet is `0-9A-Z`; since digits sort before uppercase
//! letters in ASCII, lexicographic order on paths equals numeric order
//! on segments.

use treedrive_core::{AppError, AppResult};

/// Width of one path segment in characters.
pub const STEP_LEN: usize = 4;

/// Base-36 alphabet used for segments.
const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Largest value a single segment can hold (36^4 - 1).
const MAX_SEGMENT: u32 = 36u32.pow(STEP_LEN as u32) - 1;

/// Encode a sibling ordinal as a fixed-width base-36 segment.
pub fn encode_segment(value: u32) -> AppResult<String> {
    if value > MAX_SEGMENT {
        return Err(AppError::conflict(format!(
            "Sibling segment overflow: {value} exceeds {MAX_SEGMENT}"
        )));
    }
    let mut out = [b'0'; STEP_LEN];
    let mut rest = value;
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(rest % 36) as usize];
        rest /= 36;
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Decode a fixed-width base-36 segment back to its ordinal.
pub fn decode_segment(segment: &str) -> AppResult<u32> {
    if segment.len() != STEP_LEN {
        return Err(AppError::internal(format!(
            "Malformed path segment '{segment}'"
        )));
    }
    let mut value: u32 = 0;
    for byte in segment.bytes() {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'A'..=b'Z' => byte - b'A' + 10,
            _ => {
                return Err(AppError::internal(format!(
                    "Malformed path segment '{segment}'"
                )));
            }
        };
        value = value * 36 + u32::from(digit);
    }
    Ok(value)
}

/// Depth implied by a path (number of fixed-width segments).
pub fn depth_of(path: &str) -> i32 {
    (path.len() / STEP_LEN) as i32
}

/// Compose a child path from a parent path and the child's segment.
pub fn child_path(parent_path: &str, segment: &str) -> String {
    format!("{parent_path}{segment}")
}

/// Compute the next free sibling segment given the last sibling's path.
///
/// `last_sibling_path` is the lexicographically greatest existing child
/// path under the parent, or `None` for the first child.
pub fn next_sibling_segment(last_sibling_path: Option<&str>) -> AppResult<String> {
    match last_sibling_path {
        None => encode_segment(1),
        Some(path) => {
            let segment = &path[path.len() - STEP_LEN..];
            encode_segment(decode_segment(segment)? + 1)
        }
    }
}

/// All proper ancestor paths of a node, root first, excluding the node.
pub fn ancestor_paths(path: &str) -> Vec<String> {
    (1..depth_of(path))
        .map(|level| path[..level as usize * STEP_LEN].to_string())
        .collect()
}

/// Whether `ancestor` strictly contains `descendant`.
pub fn is_ancestor(ancestor: &str, descendant: &str) -> bool {
    descendant.len() > ancestor.len() && descendant.starts_with(ancestor)
}

/// The segments of `path` below `base`, shallowest first.
///
/// Returns `None` when `path` is not a strict descendant of `base`.
pub fn segments_below<'a>(base: &str, path: &'a str) -> Option<Vec<&'a str>> {
    if !is_ancestor(base, path) {
        return None;
    }
    let tail = &path[base.len()..];
    Some(
        (0..tail.len() / STEP_LEN)
            .map(|i| &tail[i * STEP_LEN..(i + 1) * STEP_LEN])
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_roundtrip() {
        for value in [0u32, 1, 35, 36, 1_295, 46_655, MAX_SEGMENT] {
            let encoded = encode_segment(value).unwrap();
            assert_eq!(encoded.len(), STEP_LEN);
            assert_eq!(decode_segment(&encoded).unwrap(), value);
        }
    }

    #[test]
    fn test_segment_overflow() {
        assert!(encode_segment(MAX_SEGMENT + 1).is_err());
    }

    #[test]
    fn test_lexicographic_order_matches_numeric() {
        let a = encode_segment(9).unwrap();
        let b = encode_segment(10).unwrap();
        let c = encode_segment(36).unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_next_sibling_segment() {
        assert_eq!(next_sibling_segment(None).unwrap(), "0001");
        assert_eq!(next_sibling_segment(Some("00010009")).unwrap(), "000A");
    }

    #[test]
    fn test_depth_matches_segments() {
        assert_eq!(depth_of("0001"), 1);
        assert_eq!(depth_of("000100020003"), 3);
    }

    #[test]
    fn test_child_path_prefix_invariant() {
        let parent = "00010002";
        let child = child_path(parent, "0001");
        assert!(child.starts_with(parent));
        assert_eq!(depth_of(&child), depth_of(parent) + 1);
    }

    #[test]
    fn test_ancestor_paths() {
        assert_eq!(
            ancestor_paths("000100020003"),
            vec!["0001".to_string(), "00010002".to_string()]
        );
        assert!(ancestor_paths("0001").is_empty());
    }

    #[test]
    fn test_is_ancestor() {
        assert!(is_ancestor("0001", "00010002"));
        assert!(!is_ancestor("0001", "0001"));
        assert!(!is_ancestor("00010002", "0001"));
    }

    #[test]
    fn test_segments_below() {
        assert_eq!(
            segments_below("0001", "000100020003").unwrap(),
            vec!["0002", "0003"]
        );
        assert!(segments_below("0002", "000100020003").is_none());
    }
}
