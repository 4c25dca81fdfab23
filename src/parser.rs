use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::TagEntry;
use crate::domain::StudyRecord;

static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\(([0-9A-Fa-f]{4},[0-9A-Fa-f]{4})\)\s+(\S+)\s+\[(.*)\]").unwrap()
});

/// One attribute line from the query tool's output, e.g.
/// `(0008,1030) LO [Study Description]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAttribute {
    pub group_elem: String,
    pub vr: String,
    pub value: String,
}

/// Pure line classifier; returns `None` for anything that is not an
/// attribute line. The bracket value may be empty (attribute present but
/// explicitly blank).
pub fn parse_attribute_line(line: &str) -> Option<ParsedAttribute> {
    let captures = ATTRIBUTE_RE.captures(line)?;
    Some(ParsedAttribute {
        group_elem: format!("({})", &captures[1]),
        vr: captures[2].to_string(),
        value: captures[3].to_string(),
    })
}

/// `status=ff00H` (pending item) and `status=0H` (final response) both mark
/// the end of the current dataset item.
pub fn is_terminator_line(line: &str) -> bool {
    line.contains("status=ff00H") || line.contains("status=0H")
}

/// Reverse lookup from `(group_elem, vr)` to record field name, built once
/// from the configured TagSpec.
#[derive(Debug, Clone)]
pub struct TagDictionary {
    reverse: HashMap<(String, String), String>,
    field_names: Vec<String>,
}

impl TagDictionary {
    pub fn new(tag_map: &BTreeMap<String, TagEntry>) -> Self {
        let reverse = tag_map
            .values()
            .map(|entry| {
                (
                    (entry.group_elem.clone(), entry.vr.clone()),
                    entry.field.clone(),
                )
            })
            .collect();
        let field_names = tag_map.values().map(|entry| entry.field.clone()).collect();
        Self {
            reverse,
            field_names,
        }
    }

    pub fn field_for(&self, group_elem: &str, vr: &str) -> Option<&str> {
        self.reverse
            .get(&(group_elem.to_string(), vr.to_string()))
            .map(|field| field.as_str())
    }

    pub fn empty_record(&self) -> StudyRecord {
        StudyRecord::empty(self.field_names.iter().map(|name| name.as_str()))
    }
}

/// Scans the raw query output line by line and accumulates study records.
///
/// A record is appended once a terminator is seen and the accumulator holds a
/// non-empty `study_uid`; a terminated fragment without a uid is dropped. The
/// accumulator is reset on every terminator either way. A repeated tag before
/// a terminator overwrites the prior value. A trailing never-terminated
/// accumulator with a uid is appended as well (missing final terminator).
pub fn parse_studies(output: &str, tags: &TagDictionary) -> Vec<StudyRecord> {
    let mut studies = Vec::new();
    let mut current = tags.empty_record();

    for line in output.lines() {
        if let Some(attribute) = parse_attribute_line(line) {
            if let Some(field) = tags.field_for(&attribute.group_elem, &attribute.vr) {
                let field = field.to_string();
                current.set(&field, attribute.value);
            }
        }

        if is_terminator_line(line) {
            if current.study_uid().is_some() {
                studies.push(current.clone());
            }
            current = tags.empty_record();
        }
    }

    if current.study_uid().is_some() {
        studies.push(current);
    }

    studies
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_line_grammar() {
        let parsed = parse_attribute_line("(0010,0010) PN [2023_08_22_001_baseline]").unwrap();
        assert_eq!(parsed.group_elem, "(0010,0010)");
        assert_eq!(parsed.vr, "PN");
        assert_eq!(parsed.value, "2023_08_22_001_baseline");
    }

    #[test]
    fn empty_bracket_value() {
        let parsed = parse_attribute_line("(0008,1030) LO []").unwrap();
        assert_eq!(parsed.value, "");
    }

    #[test]
    fn malformed_lines_rejected() {
        assert!(parse_attribute_line("I: Requesting association").is_none());
        assert!(parse_attribute_line("(00100010) PN [x]").is_none());
        assert!(parse_attribute_line("(0010,0010) PN x").is_none());
    }

    #[test]
    fn terminator_variants() {
        assert!(is_terminator_line("I: status=ff00H"));
        assert!(is_terminator_line("I: status=0H"));
        assert!(!is_terminator_line("I: status=fe00H"));
    }
}
