use chrono::{DateTime, Utc};

/// Maximum number of bytes of a response body kept in error messages
pub const MAX_BODY_SNIPPET_LENGTH: usize = 200;

/// Truncate a response body to avoid logging excessive data.
/// Cuts on a char boundary so multi-byte text never splits mid-character.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_BODY_SNIPPET_LENGTH {
        return body.to_string();
    }

    let mut end = MAX_BODY_SNIPPET_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// Render seconds since the epoch as a UTC timestamp
pub fn format_epoch(secs: i64) -> String {
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => secs.to_string(),
    }
}
