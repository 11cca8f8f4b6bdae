//! Remote filename matching
//!
//! Remote names follow `PREFIX_[PARTITIONKEY_]TYPEKEYWORD_SERIES_SEQUENCE.ext`
//! with `_` or `-` separators. A name is split into uppercase alphanumeric
//! tokens and tested against a [`MatchRule`].

use std::collections::HashSet;

/// US state, DC and territory codes recognised as partition tokens
const JURISDICTION_CODES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ",
    "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT",
    "VA", "WA", "WV", "WI", "WY", "DC", "PR", "VI", "GU", "AS", "MP",
];

/// Matching criteria derived from a dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRule {
    /// Uppercase type keyword, e.g. `TAXASSESSOR`
    pub keyword: String,
    pub partition_keys: Vec<String>,
    pub excluded_keys: Vec<String>,
    pub allow_keyword_only: bool,
    pub ignore_partition: bool,
}

/// Why a name was accepted or rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchDecision {
    /// A token equals a requested partition key
    Partition(String),
    /// Keyword present and the name carries no partition token
    KeywordOnly,
    /// Keyword present and partitions are ignored for this dataset
    PartitionIgnored,
    /// A token equals an excluded key
    Excluded(String),
    MissingKeyword,
    /// Keyword present but the partition is not one we asked for
    OtherPartition,
}

impl MatchDecision {
    pub fn is_match(&self) -> bool {
        matches!(
            self,
            MatchDecision::Partition(_) | MatchDecision::KeywordOnly | MatchDecision::PartitionIgnored
        )
    }
}

/// Split a name into uppercase tokens on every non-alphanumeric character
pub fn tokenize(name: &str) -> Vec<String> {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_uppercase())
        .collect()
}

pub fn is_jurisdiction_code(token: &str) -> bool {
    JURISDICTION_CODES.contains(&token)
}

impl MatchRule {
    pub fn matches(&self, name: &str) -> bool {
        self.evaluate(name).is_match()
    }

    pub fn evaluate(&self, name: &str) -> MatchDecision {
        let tokens = tokenize(name);

        if let Some(excluded) = tokens.iter().find(|t| self.excluded_keys.contains(t)) {
            return MatchDecision::Excluded(excluded.clone());
        }

        let upper = name.to_ascii_uppercase();
        let has_keyword =
            tokens.iter().any(|t| *t == self.keyword) || upper.contains(self.keyword.as_str());
        if !has_keyword {
            return MatchDecision::MissingKeyword;
        }

        if let Some(key) = tokens.iter().find(|t| self.partition_keys.contains(t)) {
            return MatchDecision::Partition(key.clone());
        }

        if self.ignore_partition {
            return MatchDecision::PartitionIgnored;
        }

        if self.allow_keyword_only && !self.has_partition_token(&tokens) {
            return MatchDecision::KeywordOnly;
        }

        MatchDecision::OtherPartition
    }

    fn has_partition_token(&self, tokens: &[String]) -> bool {
        let known: HashSet<&str> = self
            .partition_keys
            .iter()
            .chain(self.excluded_keys.iter())
            .map(String::as_str)
            .collect();

        tokens
            .iter()
            .any(|t| known.contains(t.as_str()) || is_jurisdiction_code(t))
    }

    /// Server-side listing pattern, `*KEYWORD*`
    pub fn listing_pattern(&self) -> String {
        format!("*{}*", self.keyword)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(keys: &[&str], excluded: &[&str], keyword_only: bool, ignore: bool) -> MatchRule {
        MatchRule {
            keyword: "TAXASSESSOR".to_string(),
            partition_keys: keys.iter().map(|s| s.to_string()).collect(),
            excluded_keys: excluded.iter().map(|s| s.to_string()).collect(),
            allow_keyword_only: keyword_only,
            ignore_partition: ignore,
        }
    }

    #[test]
    fn test_tokenize_splits_on_separators() {
        assert_eq!(
            tokenize("1parkplace_CA-TaxAssessor_0001.zip"),
            vec!["1PARKPLACE", "CA", "TAXASSESSOR", "0001", "ZIP"]
        );
    }

    #[test]
    fn test_requested_partition_matches() {
        let r = rule(&["CA"], &[], false, false);
        assert_eq!(
            r.evaluate("1PARKPLACE_CA_TAXASSESSOR_0001.zip"),
            MatchDecision::Partition("CA".into())
        );
    }

    #[test]
    fn test_other_partition_rejected() {
        let r = rule(&["CA"], &[], false, false);
        assert_eq!(
            r.evaluate("2CITY_TX_TAXASSESSOR_0002.zip"),
            MatchDecision::OtherPartition
        );
        // keyword-only does not rescue a name that names another state
        let r = rule(&["CA"], &[], true, false);
        assert!(!r.matches("2CITY_TX_TAXASSESSOR_0002.zip"));
    }

    #[test]
    fn test_exclusion_checked_first() {
        let r = rule(&["CA"], &["CA"], true, true);
        assert_eq!(
            r.evaluate("1PARKPLACE_CA_TAXASSESSOR_0001.zip"),
            MatchDecision::Excluded("CA".into())
        );
    }

    #[test]
    fn test_keyword_required() {
        let r = rule(&["CA"], &[], true, true);
        assert_eq!(r.evaluate("1PARKPLACE_CA_RECORDER_0001.zip"), MatchDecision::MissingKeyword);
    }

    #[test]
    fn test_keyword_as_substring() {
        let r = rule(&["NV"], &[], false, false);
        assert!(r.matches("ACME-NV-TAXASSESSORHIST-7.zip"));
    }

    #[test]
    fn test_national_file_needs_keyword_only() {
        let strict = rule(&["CA"], &[], false, false);
        assert!(!strict.matches("TAXASSESSOR_NATIONAL.zip"));

        let relaxed = rule(&["CA"], &[], true, false);
        assert_eq!(relaxed.evaluate("TAXASSESSOR_NATIONAL.zip"), MatchDecision::KeywordOnly);
    }

    #[test]
    fn test_ignore_partition_accepts_any_state() {
        let r = rule(&["CA"], &[], false, true);
        assert_eq!(
            r.evaluate("2CITY_TX_TAXASSESSOR_0002.zip"),
            MatchDecision::PartitionIgnored
        );
        assert!(r.matches("TAXASSESSOR_NATIONAL.zip"));
    }

    #[test]
    fn test_ignore_partition_still_honours_exclusion() {
        let r = rule(&[], &["TX"], false, true);
        assert!(!r.matches("2CITY_TX_TAXASSESSOR_0002.zip"));
        assert!(r.matches("1PARKPLACE_CA_TAXASSESSOR_0001.zip"));
    }

    #[test]
    fn test_custom_partition_key_counts_as_token() {
        // a non-state key the dataset asked for is still a partition token
        let r = rule(&["ZONE9"], &[], true, false);
        assert!(r.matches("X_ZONE9_TAXASSESSOR_1.zip"));
        let other = rule(&["ZONE1"], &["ZONE9"], true, false);
        assert!(!other.matches("X_ZONE9_TAXASSESSOR_1.zip"));
    }

    #[test]
    fn test_listing_pattern() {
        assert_eq!(rule(&[], &[], false, false).listing_pattern(), "*TAXASSESSOR*");
    }
}
