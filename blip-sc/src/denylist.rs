//! Denylist rule matching
//!
//! Three independently configurable rule kinds: exact address, address
//! prefix, and display-name regex. Rules are compiled once at startup;
//! an invalid pattern is a configuration error, never a runtime one.

use std::collections::HashSet;

use regex::Regex;

use blip_common::config::DenylistConfig;
use blip_common::{Error, Result};

/// Which rule kind matched, for drop-reason reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Address,
    AddressPrefix,
    NamePattern,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Address => "address",
            RuleKind::AddressPrefix => "address_prefix",
            RuleKind::NamePattern => "name_pattern",
        }
    }
}

/// A denylist hit: the rule kind and the rule that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyMatch {
    pub kind: RuleKind,
    pub rule: String,
}

/// Compiled denylist. Matching is case-insensitive on addresses
/// (normalized to upper case) and regex-driven on names.
#[derive(Debug, Default)]
pub struct Denylist {
    enabled: bool,
    addresses: HashSet<String>,
    address_prefixes: Vec<String>,
    name_patterns: Vec<Regex>,
}

impl Denylist {
    /// Compile the configured rule set.
    ///
    /// Returns a configuration error for any invalid name pattern; the
    /// process must not start with a partially applied denylist.
    pub fn compile(config: &DenylistConfig) -> Result<Denylist> {
        let addresses = config
            .addresses
            .iter()
            .map(|a| a.to_uppercase())
            .collect();
        let address_prefixes = config
            .address_prefixes
            .iter()
            .map(|p| p.to_uppercase())
            .collect();

        let mut name_patterns = Vec::with_capacity(config.name_patterns.len());
        for pattern in &config.name_patterns {
            let regex = Regex::new(pattern).map_err(|e| {
                Error::Config(format!("invalid denylist name pattern '{}': {}", pattern, e))
            })?;
            name_patterns.push(regex);
        }

        Ok(Denylist {
            enabled: config.enabled,
            addresses,
            address_prefixes,
            name_patterns,
        })
    }

    /// Check an advertisement against the rules. First match wins.
    ///
    /// `address` is expected upper-cased (the admission filter normalizes
    /// before calling).
    pub fn matches(&self, address: &str, name: Option<&str>) -> Option<DenyMatch> {
        if !self.enabled {
            return None;
        }

        if self.addresses.contains(address) {
            return Some(DenyMatch {
                kind: RuleKind::Address,
                rule: address.to_string(),
            });
        }

        for prefix in &self.address_prefixes {
            if address.starts_with(prefix.as_str()) {
                return Some(DenyMatch {
                    kind: RuleKind::AddressPrefix,
                    rule: prefix.clone(),
                });
            }
        }

        if let Some(name) = name {
            for pattern in &self.name_patterns {
                if pattern.is_match(name) {
                    return Some(DenyMatch {
                        kind: RuleKind::NamePattern,
                        rule: pattern.as_str().to_string(),
                    });
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(
        addresses: &[&str],
        prefixes: &[&str],
        patterns: &[&str],
    ) -> DenylistConfig {
        DenylistConfig {
            enabled: true,
            addresses: addresses.iter().map(|s| s.to_string()).collect(),
            address_prefixes: prefixes.iter().map(|s| s.to_string()).collect(),
            name_patterns: patterns.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_exact_address_match() {
        let denylist = Denylist::compile(&config(&["aa:bb:cc:dd:ee:ff"], &[], &[])).unwrap();

        let hit = denylist.matches("AA:BB:CC:DD:EE:FF", None).unwrap();
        assert_eq!(hit.kind, RuleKind::Address);
        assert!(denylist.matches("AA:BB:CC:DD:EE:00", None).is_none());
    }

    #[test]
    fn test_prefix_match() {
        let denylist = Denylist::compile(&config(&[], &["F0:18:98"], &[])).unwrap();

        let hit = denylist.matches("F0:18:98:11:22:33", None).unwrap();
        assert_eq!(hit.kind, RuleKind::AddressPrefix);
        assert_eq!(hit.rule, "F0:18:98");
        assert!(denylist.matches("F1:18:98:11:22:33", None).is_none());
    }

    #[test]
    fn test_name_pattern_match() {
        let denylist = Denylist::compile(&config(&[], &[], &["^Tile"])).unwrap();

        let hit = denylist.matches("AA:BB:CC:DD:EE:FF", Some("Tile Tracker")).unwrap();
        assert_eq!(hit.kind, RuleKind::NamePattern);
        assert!(denylist.matches("AA:BB:CC:DD:EE:FF", Some("My Tile")).is_none());
        assert!(denylist.matches("AA:BB:CC:DD:EE:FF", None).is_none());
    }

    #[test]
    fn test_first_match_wins_across_kinds() {
        let denylist = Denylist::compile(&config(
            &["F0:18:98:11:22:33"],
            &["F0:18:98"],
            &[],
        ))
        .unwrap();

        // Exact rule is checked before the prefix rule
        let hit = denylist.matches("F0:18:98:11:22:33", None).unwrap();
        assert_eq!(hit.kind, RuleKind::Address);
    }

    #[test]
    fn test_disabled_denylist_never_matches() {
        let mut cfg = config(&["AA:BB:CC:DD:EE:FF"], &[], &[]);
        cfg.enabled = false;
        let denylist = Denylist::compile(&cfg).unwrap();

        assert!(denylist.matches("AA:BB:CC:DD:EE:FF", None).is_none());
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = Denylist::compile(&config(&[], &[], &["("])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
