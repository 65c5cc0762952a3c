/// Normalize a store path to the canonical form used in every event.
///
/// The result always starts with exactly one `/`, has no empty or `.`
/// segments and no trailing slash (except for the root itself). `..` pops the
/// previous segment and never climbs above the root.
pub fn normalize_path(raw: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(raw.len() + 1);
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}

/// Parent directory of `path`; the root is its own parent.
pub fn parent_of(path: &str) -> String {
    let norm = normalize_path(path);
    match norm.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

/// Absolute path of `name` inside directory `parent`.
pub fn join_child(parent: &str, name: &str) -> String {
    normalize_path(&format!("{}/{}", parent.trim_end_matches('/'), name))
}
