//! Property-based tests using proptest
//!
//! These tests verify invariants that must hold for ALL inputs:
//! - A line upsert is idempotent (second application is a no-op)
//! - After an upsert exactly one line matches the pattern, and it is the replacement
//! - Lines that do not match the pattern survive untouched and in order
//! - CRLF files keep CRLF endings
//! - Enum string conversions are consistent

use pgprovision::config_file::{HbaAuthMethod, HbaConnectionType};
use pgprovision::lineinfile::{LinePattern, LineUpsert, UpsertAction};
use pgprovision::step::ServiceAction;
use proptest::prelude::*;
use std::str::FromStr;
use strum::IntoEnumIterator;

// =============================================================================
// Strategies
// =============================================================================

const KEYS: &[&str] = &["work_mem", "shared_buffers", "listen_addresses", "max_connections"];

fn key_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(KEYS)
}

fn value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9']{1,12}"
}

/// A postgresql.conf-like line: settings (commented or not), comments, blanks
fn line_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        (key_strategy(), value_strategy()).prop_map(|(k, v)| format!("{} = {}", k, v)),
        (key_strategy(), value_strategy()).prop_map(|(k, v)| format!("#{} = {}\t# note", k, v)),
        (key_strategy(), value_strategy()).prop_map(|(k, v)| format!("  {}={}", k, v)),
        "# [a-z ]{0,30}",
        "[a-z_]{1,20} = [0-9]{1,4}",
        Just(String::new()),
    ]
}

fn content_strategy() -> impl Strategy<Value = String> {
    (prop::collection::vec(line_strategy(), 0..20), any::<bool>()).prop_map(|(lines, trailing)| {
        let mut content = lines.join("\n");
        if trailing && !content.is_empty() {
            content.push('\n');
        }
        content
    })
}

// =============================================================================
// Line Upsert Properties
// =============================================================================

proptest! {
    /// Applying the same upsert twice changes nothing the second time
    #[test]
    fn upsert_is_idempotent(content in content_strategy(), key in key_strategy(), value in value_strategy()) {
        let upsert = LineUpsert::setting(key, &value).unwrap();
        let once = upsert.apply(&content);
        let twice = upsert.apply(&once.content);

        prop_assert_eq!(&twice.content, &once.content);
        prop_assert_eq!(twice.action, UpsertAction::Unchanged);
    }

    /// Exactly one matching line remains, and it is the replacement
    #[test]
    fn upsert_leaves_single_match(content in content_strategy(), key in key_strategy(), value in value_strategy()) {
        let upsert = LineUpsert::setting(key, &value).unwrap();
        let result = upsert.apply(&content).content;
        let pattern = upsert.pattern();

        let matching: Vec<&str> = result.lines().filter(|l| pattern.is_match(l)).collect();
        prop_assert_eq!(matching, vec![upsert.line()]);
    }

    /// Non-matching lines are preserved in their original order
    #[test]
    fn upsert_preserves_other_lines(content in content_strategy(), key in key_strategy(), value in value_strategy()) {
        let upsert = LineUpsert::setting(key, &value).unwrap();
        let result = upsert.apply(&content).content;
        let pattern = upsert.pattern();

        let before: Vec<&str> = content.lines().filter(|l| !pattern.is_match(l)).collect();
        let after: Vec<&str> = result.lines().filter(|l| !pattern.is_match(l)).collect();
        prop_assert_eq!(before, after);
    }

    /// With no matching line the replacement is appended and nothing else moves
    #[test]
    fn upsert_appends_when_absent(lines in prop::collection::vec("# [a-z ]{0,30}", 0..10), value in value_strategy()) {
        let content = if lines.is_empty() { String::new() } else { format!("{}\n", lines.join("\n")) };
        let upsert = LineUpsert::setting("work_mem", &value).unwrap();
        let outcome = upsert.apply(&content);

        prop_assert_eq!(outcome.action, UpsertAction::Appended);
        prop_assert_eq!(outcome.content, format!("{}work_mem = {}\n", content, value));
    }

    /// CRLF content gets the same edit as LF content and stays CRLF throughout
    #[test]
    fn upsert_keeps_crlf(content in content_strategy(), key in key_strategy(), value in value_strategy()) {
        prop_assume!(content.contains('\n'));
        let crlf = content.replace('\n', "\r\n");
        let upsert = LineUpsert::setting(key, &value).unwrap();
        let result = upsert.apply(&crlf).content;

        prop_assert!(!result.replace("\r\n", "").contains('\n'));
        prop_assert_eq!(result.replace("\r\n", "\n"), upsert.apply(&content).content);
    }

    /// A replacement that does not match its own pattern is rejected
    #[test]
    fn replacement_must_match_pattern(key in key_strategy(), other in "[a-z]{3,10}") {
        prop_assume!(!other.starts_with(key));
        let pattern = LinePattern::for_setting(key).unwrap();
        let replacement = format!("{} = 1", other);
        prop_assert!(LineUpsert::new(pattern, replacement).is_err());
    }
}

// =============================================================================
// Enum Conversion Properties
// =============================================================================

proptest! {
    /// ServiceAction Display and FromStr agree
    #[test]
    fn service_action_roundtrip(index in 0usize..4) {
        let action = ServiceAction::iter().nth(index).unwrap();
        let parsed = ServiceAction::from_str(&action.to_string()).unwrap();
        prop_assert_eq!(parsed, action);
    }

    /// HbaAuthMethod Display and FromStr agree
    #[test]
    fn hba_method_roundtrip(index in 0usize..7) {
        let method = HbaAuthMethod::iter().nth(index).unwrap();
        let parsed = HbaAuthMethod::from_str(&method.to_string()).unwrap();
        prop_assert_eq!(parsed, method);
    }

    /// Only `local` rules omit the address column
    #[test]
    fn hba_connection_type_address(index in 0usize..4) {
        let conn = HbaConnectionType::iter().nth(index).unwrap();
        prop_assert_eq!(conn.needs_address(), conn != HbaConnectionType::Local);
    }
}
