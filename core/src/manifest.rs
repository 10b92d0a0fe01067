//! Parser for Nix's `key: value` manifest format.
//!
//! Both `/nix-cache-info` and `.narinfo` documents use this line-oriented
//! format: one `Key: value` pair per line, a key may repeat (narinfo
//! documents may carry multiple `Sig:` lines), and values are not escaped.
//!
//! The server side of this format has a full generic serde backend
//! (`nix_manifest`) because it also needs to *produce* documents for
//! arbitrary struct shapes. This client only ever parses two known, fixed
//! shapes, so a small hand-written line parser is sufficient and is much
//! smaller than porting that generic backend.

use crate::error::{Error, Result};

/// A parsed manifest document: an ordered list of key/value pairs.
#[derive(Debug, Clone, Default)]
pub struct ManifestDocument {
    entries: Vec<(String, String)>,
}

impl ManifestDocument {
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            let colon = line.find(':').ok_or_else(|| Error::MalformedManifest {
                reason: format!("line {}: missing ':' separator: {:?}", lineno + 1, line),
            })?;

            let key = line[..colon].trim().to_string();
            let value = line[colon + 1..].trim().to_string();
            entries.push((key, value));
        }

        Ok(Self { entries })
    }

    /// Returns the first value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value for `key`, in document order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns a required field, or a `MalformedManifest` error.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| Error::MalformedManifest {
            reason: format!("missing required field {key:?}"),
        })
    }
}

/// Splits a space-delimited list field (e.g. `References`) into items.
pub fn split_space_delimited(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_document() {
        let doc = ManifestDocument::parse("StoreDir: /nix/store\nWantMassQuery: 1\n").unwrap();
        assert_eq!(doc.get("StoreDir"), Some("/nix/store"));
        assert_eq!(doc.get("WantMassQuery"), Some("1"));
    }

    #[test]
    fn collects_repeated_keys() {
        let doc = ManifestDocument::parse("Sig: a\nSig: b\n").unwrap();
        let sigs: Vec<_> = doc.get_all("Sig").collect();
        assert_eq!(sigs, vec!["a", "b"]);
    }

    #[test]
    fn rejects_line_without_colon() {
        assert!(ManifestDocument::parse("not a valid line").is_err());
    }

    #[test]
    fn splits_reference_lists() {
        assert_eq!(
            split_space_delimited("a-foo b-bar  c-baz"),
            vec!["a-foo", "b-bar", "c-baz"]
        );
    }
}
