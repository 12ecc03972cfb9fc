// src/pattern.rs

//! Path-pattern matching for slice contents.
//!
//! Patterns are absolute POSIX paths with three wildcards: `?` matches one
//! character other than `/`, `*` matches a run of characters other than
//! `/`, and `**` matches a run of any characters including `/`. A pattern
//! ending in `/` only matches directory-form paths. `**` may only appear
//! in the last slash-delimited segment; the release loader enforces that.

/// Return true if `path` contains any wildcard character.
pub fn has_wildcard(path: &str) -> bool {
    path.contains('*') || path.contains('?')
}

/// Return true if every `**` in the pattern sits in the final
/// slash-delimited segment.
pub fn double_star_in_tail(pattern: &str) -> bool {
    match pattern.find("**") {
        Some(pos) => !pattern[pos..].contains('/'),
        None => true,
    }
}

/// Return true if `path` is accepted by `pattern`.
///
/// `path` is a literal; wildcards in it are not special.
pub fn matches(pattern: &str, path: &str) -> bool {
    match_bytes(pattern.as_bytes(), path.as_bytes())
}

fn match_bytes(pattern: &[u8], path: &[u8]) -> bool {
    if pattern.starts_with(b"**") {
        return match_bytes(&pattern[2..], path)
            || (!path.is_empty() && match_bytes(pattern, &path[1..]));
    }
    match pattern.first() {
        None => path.is_empty(),
        Some(b'*') => {
            match_bytes(&pattern[1..], path)
                || (!path.is_empty() && path[0] != b'/' && match_bytes(pattern, &path[1..]))
        }
        Some(b'?') => {
            !path.is_empty() && path[0] != b'/' && match_bytes(&pattern[1..], &path[1..])
        }
        Some(&c) => {
            !path.is_empty() && path[0] == c && match_bytes(&pattern[1..], &path[1..])
        }
    }
}

/// Return the shallowest directory-level prefix at which two patterns
/// could refer to the same path, or `None` if they are disjoint.
///
/// Segments are compared in lockstep: literal segments must be equal, a
/// wildcard segment is tested against its counterpart on its own, and a
/// segment containing `**` absorbs the whole remaining tail.
pub fn overlap(pattern_a: &str, pattern_b: &str) -> Option<String> {
    let segs_a: Vec<&str> = pattern_a.split('/').collect();
    let segs_b: Vec<&str> = pattern_b.split('/').collect();

    let mut resolved: Vec<&str> = Vec::new();
    let i = 0;
    loop {
        let a = segs_a.get(i);
        let b = segs_b.get(i);
        match (a, b) {
            (None, None) => {
                // Both exhausted at the same depth: the common path itself.
                return Some(resolved.join("/"));
            }
            (Some(a), Some(b)) => {
                if a.contains("**") || b.contains("**") {
                    // The tail is absorbed; overlap starts at this directory.
                    let mut prefix = resolved.join("/");
                    prefix.push('/');
                    return Some(prefix);
                }
                let a_wild = has_wildcard(a);
                let b_wild = has_wildcard(b);
                let ok = match (a_wild, b_wild) {
                    (false, false) => a == b,
                    (true, false) => match_bytes(a.as_bytes(), b.as_bytes()),
                    (false, true) => match_bytes(b.as_bytes(), a.as_bytes()),
                    (true, true) => segment_intersects(a.as_bytes(), b.as_bytes()),
                };
                if !ok {
                    return None;
                }
                resolved.push(if a_wild { b } else { a });
            }
            // One pattern names a strictly deeper or shallower path.
            _ => return None,
        }
    }
}

/// True if two single segments (no `/` inside) can match a common string.
fn segment_intersects(a: &[u8], b: &[u8]) -> bool {
    if a.first() == Some(&b'*') {
        return segment_intersects(&a[1..], b)
            || (!b.is_empty() && segment_intersects(a, &b[1..]));
    }
    if b.first() == Some(&b'*') {
        return segment_intersects(a, &b[1..])
            || (!a.is_empty() && segment_intersects(&a[1..], b));
    }
    match (a.first(), b.first()) {
        (None, None) => true,
        (Some(&ca), Some(&cb)) => {
            (ca == b'?' || cb == b'?' || ca == cb)
                && segment_intersects(&a[1..], &b[1..])
        }
        _ => false,
    }
}
