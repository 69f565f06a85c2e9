//! Deterministic names for resources the harness creates.
//!
//! Names are `<prefix>-<suite>-<test>-<disambiguator>`, lowercased, with
//! every character outside `[a-z0-9]` folded to `-`. External cleanup tooling
//! recognizes orphans by the prefix alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default prefix for harness-created resources.
pub const DEFAULT_PREFIX: &str = "pcv";

/// Disambiguator modulus: four base-10 digits of the creation millisecond.
const DISAMBIGUATOR_MODULUS: i64 = 10_000;

/// Naming convention for resources created by one harness installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConvention {
    prefix: String,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl NamingConvention {
    /// Create a convention with a custom prefix.
    #[must_use]
    pub fn new(prefix: impl AsRef<str>) -> Self {
        let prefix = sanitize(prefix.as_ref());
        Self {
            prefix: if prefix.is_empty() {
                DEFAULT_PREFIX.to_string()
            } else {
                prefix
            },
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Name for a resource created now.
    #[must_use]
    pub fn name(&self, suite: &str, test: &str) -> String {
        self.name_at(suite, test, Utc::now())
    }

    /// Name for a resource created at `at`.
    #[must_use]
    pub fn name_at(&self, suite: &str, test: &str, at: DateTime<Utc>) -> String {
        let disambiguator = at.timestamp_millis().rem_euclid(DISAMBIGUATOR_MODULUS);
        let mut parts = vec![self.prefix.clone()];
        for part in [sanitize(suite), sanitize(test)] {
            if !part.is_empty() {
                parts.push(part);
            }
        }
        parts.push(format!("{disambiguator:04}"));
        parts.join("-")
    }

    /// Returns true if `name` was produced by this convention.
    #[must_use]
    pub fn owns(&self, name: &str) -> bool {
        name.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Prefix shared by every resource a given suite creates.
    #[must_use]
    pub fn suite_prefix(&self, suite: &str) -> String {
        format!("{}-{}-", self.prefix, sanitize(suite))
    }
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true;
    for ch in raw.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn name_is_deterministic_for_a_timestamp() {
        let naming = NamingConvention::default();
        let at = Utc.timestamp_millis_opt(1_700_000_012_345).unwrap();
        assert_eq!(
            naming.name_at("StatefulVMTests", "modifyInstance", at),
            "pcv-statefulvmtests-modifyinstance-2345"
        );
    }

    #[test]
    fn sanitizes_separators() {
        let naming = NamingConvention::new("Dsn Test");
        let at = Utc.timestamp_millis_opt(7).unwrap();
        assert_eq!(
            naming.name_at("compute::vm", "launch_many", at),
            "dsn-test-compute-vm-launch-many-0007"
        );
    }

    #[test]
    fn owns_only_prefixed_names() {
        let naming = NamingConvention::default();
        let name = naming.name("suite", "test");
        assert!(naming.owns(&name));
        assert!(name.starts_with(&naming.suite_prefix("suite")));
        assert!(!naming.owns("pcvx-suite"));
        assert!(!naming.owns("production-db"));
    }

    #[test]
    fn empty_prefix_falls_back_to_default() {
        assert_eq!(NamingConvention::new("--").prefix(), DEFAULT_PREFIX);
    }
}
