use std::sync::LazyLock;

use regex::Regex;

// Patient names look like `2023_08_22_001_baseline`: optional date stamp,
// optional alphabetic prefix with optional hyphen, subject digits, optional
// trailing descriptor.
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d{4}_\d{2}_\d{2}_)?(?:[A-Za-z]*-?)?(\d+)(?:_(.*))?$").unwrap()
});

/// Derives a `sub-XXX` label from the digit group of a patient name, or
/// `None` when the name has no digit group.
pub fn resolve_subject(name: &str) -> Option<String> {
    let captures = NAME_RE.captures(name)?;
    let digits = captures.get(1)?.as_str();
    if digits.is_empty() {
        return None;
    }
    Some(format!("sub-{digits}"))
}

/// Extracts the trailing descriptor after the subject digits. Only present
/// when the digits matched, and even then the trailing segment is optional.
pub fn resolve_trailing(name: &str) -> Option<String> {
    let captures = NAME_RE.captures(name)?;
    captures.get(2).map(|group| group.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name() {
        assert_eq!(
            resolve_subject("2023_08_22_001_baseline").as_deref(),
            Some("sub-001")
        );
        assert_eq!(
            resolve_trailing("2023_08_22_001_baseline").as_deref(),
            Some("baseline")
        );
    }

    #[test]
    fn digits_without_trailing() {
        assert_eq!(resolve_subject("042").as_deref(), Some("sub-042"));
        assert_eq!(resolve_trailing("042"), None);
    }

    #[test]
    fn prefixed_name() {
        assert_eq!(resolve_subject("PS-17_followup").as_deref(), Some("sub-17"));
        assert_eq!(resolve_trailing("PS-17_followup").as_deref(), Some("followup"));
    }

    #[test]
    fn no_digit_group() {
        assert_eq!(resolve_subject("baseline"), None);
        assert_eq!(resolve_trailing("baseline"), None);
    }
}
