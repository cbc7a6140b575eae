//! Helpers for normalizing source metadata before it is stored.

use std::collections::BTreeMap;

/// Sanitize arbitrary string input by trimming whitespace and dropping empties.
pub(crate) fn sanitize_string(value: Option<&str>) -> Option<String> {
    value.and_then(|input| {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Trim attribute keys and values, dropping entries where either is blank.
pub(crate) fn sanitize_attributes(attributes: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    attributes
        .iter()
        .filter_map(|(key, value)| {
            let key = sanitize_string(Some(key))?;
            let value = sanitize_string(Some(value))?;
            Some((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_string_trims_and_drops_blank() {
        assert_eq!(sanitize_string(Some("  doc.md ")), Some("doc.md".into()));
        assert_eq!(sanitize_string(Some("   ")), None);
        assert_eq!(sanitize_string(None), None);
    }

    #[test]
    fn sanitize_attributes_drops_blank_entries() {
        let mut attributes = BTreeMap::new();
        attributes.insert(" page ".to_string(), " 3 ".to_string());
        attributes.insert("empty".to_string(), "  ".to_string());
        attributes.insert("  ".to_string(), "orphan".to_string());

        let sanitized = sanitize_attributes(&attributes);
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized.get("page").map(String::as_str), Some("3"));
    }
}
