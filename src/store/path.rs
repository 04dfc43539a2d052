//! Dotted/indexed store paths, e.g. `entry_list[3].file_name_hash`.

use std::fmt::Write;

/// Characters that may not appear in a field name.
pub(crate) const RESERVED_NAME_CHARS: &[char] = &['.', '[', ']', '?'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PathSegment<'a> {
    pub name: &'a str,
    pub index: Option<usize>,
}

pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(RESERVED_NAME_CHARS)
        && !name.chars().any(char::is_whitespace)
}

/// Split a path into its segments.
pub(crate) fn parse_path(path: &str) -> Result<Vec<PathSegment<'_>>, &'static str> {
    if path.is_empty() {
        return Err("path is empty");
    }

    let mut segments = Vec::new();
    for part in path.split('.') {
        let (name, index) = match part.find('[') {
            Some(open) => {
                let close = part.len() - 1;
                if !part.ends_with(']') || close <= open + 1 {
                    return Err("malformed index");
                }
                let index = part[open + 1..close]
                    .parse::<usize>()
                    .map_err(|_| "index is not a non-negative integer")?;
                (&part[..open], Some(index))
            }
            None => (part, None),
        };

        if !is_valid_name(name) {
            return Err("segment name is empty or contains a reserved character");
        }
        segments.push(PathSegment { name, index });
    }

    Ok(segments)
}

/// `prefix.name`, or just `name` at the top level.
pub(crate) fn child_path(scope: Option<&str>, name: &str) -> String {
    match scope {
        Some(scope) => {
            let mut out = String::with_capacity(scope.len() + name.len() + 1);
            out.push_str(scope);
            out.push('.');
            out.push_str(name);
            out
        }
        None => name.to_owned(),
    }
}

/// `group[index]`
pub(crate) fn item_path(group: &str, index: usize) -> String {
    let mut out = String::with_capacity(group.len() + 4);
    out.push_str(group);
    let _ = write!(out, "[{index}]");
    out
}

/// Enclosing repetition scopes of `scope`, innermost first.
///
/// `a[1].b[2]` yields `a[1].b[2]` and then `a[1]`.
pub(crate) fn enclosing_scopes(scope: &str) -> Vec<&str> {
    let mut scopes = Vec::new();
    let mut end = scope.len();
    loop {
        let candidate = &scope[..end];
        if candidate.ends_with(']') {
            scopes.push(candidate);
        }
        match candidate.rfind('.') {
            Some(dot) => end = dot,
            None => break,
        }
    }
    scopes
}
