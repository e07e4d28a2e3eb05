//! Requirement identifiers
//!
//! Requirements documents label each requirement `REQ-NNN`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static REQ_ID: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\bREQ-\d{3,}\b").ok());

/// Distinct requirement ids mentioned in `text`
#[must_use]
pub fn requirement_ids(text: &str) -> BTreeSet<String> {
    match REQ_ID.as_ref() {
        Some(re) => re.find_iter(text).map(|m| m.as_str().to_string()).collect(),
        None => BTreeSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_distinct_ids() {
        let ids = requirement_ids("REQ-001 login\nREQ-002 logout\nsee REQ-001\nREQ-1 is too short");
        assert_eq!(
            ids.into_iter().collect::<Vec<_>>(),
            vec!["REQ-001".to_string(), "REQ-002".to_string()]
        );
    }
}
