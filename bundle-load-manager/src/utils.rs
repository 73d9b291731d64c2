use std::time::{SystemTime, UNIX_EPOCH};

/// Joins path segments with `/`, collapsing redundant separators between them.
pub(crate) fn join_path(parts: &[&str]) -> String {
    let mut path = String::new();
    for (index, part) in parts.iter().enumerate() {
        let part = if index == 0 {
            part.trim_end_matches('/')
        } else {
            part.trim_matches('/')
        };
        if part.is_empty() && index != 0 {
            continue;
        }
        if index != 0 {
            path.push('/');
        }
        path.push_str(part);
    }
    path
}

/// Milliseconds since the unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
