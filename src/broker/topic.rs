//! MQTT topic filters
//!
//! `+` matches exactly one level and `#` matches any number of trailing
//! levels (including none). Topics starting with `$` are only matched by
//! filters that name the `$` level explicitly.

use crate::error::{ReplayError, Result};

/// Check a subscription filter for wildcard misuse
pub fn validate_filter(filter: &str) -> Result<()> {
    if filter.is_empty() {
        return Err(ReplayError::Usage("topic filter cannot be empty".to_string()));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return Err(ReplayError::Usage(format!(
                "'#' must be the whole last level in filter '{}'",
                filter
            )));
        }
        if level.contains('+') && *level != "+" {
            return Err(ReplayError::Usage(format!(
                "'+' must occupy a whole level in filter '{}'",
                filter
            )));
        }
    }
    Ok(())
}

/// Whether `topic` is matched by `filter`
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && !filter.starts_with('$') {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
