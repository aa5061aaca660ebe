use std::collections::BTreeSet;

use sha1::{Digest, Sha1};

use crate::error::RefreshError;
use crate::refresh::SnapshotParser;

/// Hash accepted from every iOS client regardless of the published list.
pub const IOS_CONTENT_HASH: &str = "ios,ios";

/// Turns published security keys into the accepted protocol versions:
/// `hex(sha1(key + salt))`.
#[derive(Debug, Clone)]
pub struct SecurityKeyParser {
    salt: String,
}

impl SecurityKeyParser {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    pub fn version_for(&self, key: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        hasher.update(self.salt.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl SnapshotParser for SecurityKeyParser {
    type Snapshot = Vec<String>;

    fn name(&self) -> &'static str {
        "security-keys"
    }

    fn parse(&self, entries: Vec<String>) -> Result<Self::Snapshot, RefreshError> {
        Ok(entries.iter().map(|key| self.version_for(key)).collect())
    }
}

/// Accepted client content hashes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHashParser;

impl SnapshotParser for ContentHashParser {
    type Snapshot = BTreeSet<String>;

    fn name(&self) -> &'static str {
        "content-hashes"
    }

    fn parse(&self, entries: Vec<String>) -> Result<Self::Snapshot, RefreshError> {
        let mut hashes: BTreeSet<String> = entries.into_iter().collect();
        hashes.insert(IOS_CONTENT_HASH.to_string());
        Ok(hashes)
    }
}

/// One memory checksum probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemHash {
    pub check_idx: u32,
    pub value: u32,
    pub fail_mask: u32,
}

pub type MemHashConfig = Vec<MemHash>;
pub type MemHashConfigs = Vec<MemHashConfig>;

/// Parses memory-hash configurations. Each entry is one configuration of
/// `;`-separated `check_idx,value,fail_mask` groups. Groups with fewer than
/// three fields are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemHashParser;

impl MemHashParser {
    pub fn parse_config(entry: &str) -> Result<MemHashConfig, RefreshError> {
        let field = |raw: &str| {
            raw.trim().parse::<u32>().map_err(|e| RefreshError::Parse {
                entry: entry.to_string(),
                reason: format!("{:?}: {}", raw, e),
            })
        };

        let mut config = MemHashConfig::new();
        for group in entry.split(';') {
            let args: Vec<&str> = group.split(',').collect();
            if args.len() < 3 {
                continue;
            }
            config.push(MemHash {
                check_idx: field(args[0])?,
                value: field(args[1])?,
                fail_mask: field(args[2])?,
            });
        }
        Ok(config)
    }
}

impl SnapshotParser for MemHashParser {
    type Snapshot = MemHashConfigs;

    fn name(&self) -> &'static str {
        "mem-hashes"
    }

    fn parse(&self, entries: Vec<String>) -> Result<Self::Snapshot, RefreshError> {
        entries.iter().map(|e| Self::parse_config(e)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_version_is_salted_sha1() {
        let parser = SecurityKeyParser::new("salt");
        // sha1("abcsalt")
        let mut hasher = Sha1::new();
        hasher.update(b"abcsalt");
        let expected = hex::encode(hasher.finalize());

        assert_eq!(parser.version_for("abc"), expected);
        assert_eq!(parser.version_for("abc").len(), 40);
        assert_ne!(parser.version_for("abc"), parser.version_for("abd"));
    }

    #[test]
    fn security_versions_keep_order() {
        let parser = SecurityKeyParser::new("HregBEighE");
        let versions = parser
            .parse(vec!["k1".to_string(), "k2".to_string()])
            .unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0], parser.version_for("k1"));
        assert_eq!(versions[1], parser.version_for("k2"));
    }

    #[test]
    fn content_hashes_always_accept_ios() {
        let hashes = ContentHashParser.parse(vec![]).unwrap();
        assert!(hashes.contains(IOS_CONTENT_HASH));

        let hashes = ContentHashParser
            .parse(vec!["a".to_string(), "b".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(hashes.len(), 3);
    }

    #[test]
    fn mem_hash_config_parses_groups() {
        let config = MemHashParser::parse_config("1,2,3;4,5,6").unwrap();
        assert_eq!(
            config,
            vec![
                MemHash { check_idx: 1, value: 2, fail_mask: 3 },
                MemHash { check_idx: 4, value: 5, fail_mask: 6 },
            ]
        );
    }

    #[test]
    fn mem_hash_short_groups_are_skipped() {
        let config = MemHashParser::parse_config("1,2;7,8,9,10;").unwrap();
        assert_eq!(config, vec![MemHash { check_idx: 7, value: 8, fail_mask: 9 }]);
    }

    #[test]
    fn mem_hash_rejects_non_numeric_fields() {
        let err = MemHashParser::parse_config("1,x,3").unwrap_err();
        assert!(matches!(err, RefreshError::Parse { .. }));
    }

    #[test]
    fn mem_hash_one_config_per_entry() {
        let configs = MemHashParser
            .parse(vec!["1,2,3".to_string(), "4,5,6;7,8,9".to_string()])
            .unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1].len(), 2);
    }
}
