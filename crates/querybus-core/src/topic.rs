//! Topic naming.

/// Topic separator.
pub const SEPARATOR: char = '/';

/// Give a base path exactly one trailing separator.
pub fn normalize_base(base_path: &str) -> String {
    let mut base = base_path.trim_end_matches(SEPARATOR).to_string();
    base.push(SEPARATOR);
    base
}

/// Initial subscription topic for a host: `<base>/host/<host>`.
pub fn host_topic(base_path: &str, host_name: &str) -> String {
    format!("{}host/{}", normalize_base(base_path), host_name)
}

/// Bus prefix matching: `topic` is delivered to a queue bound to `prefix`.
pub fn matches_prefix(prefix: &str, topic: &str) -> bool {
    topic.starts_with(prefix)
}

/// Whether `topic` is `base` itself or a topic nested under it.
pub fn extends_topic(base: &str, topic: &str) -> bool {
    match topic.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with(SEPARATOR),
        None => false,
    }
}
