// src/rule/parser.rs

//! Rule file parsing and validation

use crate::error::{Error, Result};
use crate::rule::format::{ConfigureStyle, RuleFile};
use crate::rule::substitute;
use crate::target::TargetId;
use std::collections::BTreeMap;
use std::path::Path;

/// Parse a rule from a TOML string
pub fn parse_rule(name: &str, content: &str) -> Result<RuleFile> {
    toml::from_str(content).map_err(|e| Error::RuleLoad {
        name: name.to_string(),
        reason: format!("invalid rule file: {}", e),
    })
}

/// Parse and validate the rule file for `name`
pub fn parse_rule_file(name: &str, path: &Path) -> Result<RuleFile> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::RuleLoad {
        name: name.to_string(),
        reason: format!("cannot read {}: {}", path.display(), e),
    })?;

    let rule = parse_rule(name, &content)?;
    validate_rule(name, &rule)?;
    Ok(rule)
}

/// Check that a parsed rule satisfies the rule contract
pub fn validate_rule(name: &str, rule: &RuleFile) -> Result<()> {
    let fail = |reason: String| Error::RuleLoad {
        name: name.to_string(),
        reason,
    };

    if rule.package.name != name {
        return Err(fail(format!(
            "file defines package '{}', expected '{}'",
            rule.package.name, name
        )));
    }

    let source_kinds = [
        rule.source.git.is_some(),
        rule.source.path.is_some(),
        rule.source.none,
    ];
    if source_kinds.iter().filter(|set| **set).count() > 1 {
        return Err(fail(
            "[source] may set only one of git, path and none".to_string(),
        ));
    }
    if rule.source.revision.is_some() && rule.git_url("").is_none() {
        return Err(fail("[source] revision requires a git source".to_string()));
    }

    if !rule.package.group {
        let Some(configure) = &rule.configure else {
            return Err(fail(
                "no [configure] section; non-group rules must say how to configure".to_string(),
            ));
        };

        if configure.style == ConfigureStyle::Cross && configure.command.is_none() {
            if rule.variants.is_empty() {
                return Err(fail(
                    "cross configure needs variants with a 'target' parameter".to_string(),
                ));
            }
            for (variant, params) in &rule.variants {
                if !params.contains_key("target") {
                    return Err(fail(format!(
                        "variant '{}' has no 'target' parameter for cross configure",
                        variant
                    )));
                }
            }
        }
    }

    for variant in rule.variants.keys() {
        if variant.is_empty() || variant.contains(['@', '/']) {
            return Err(fail(format!("invalid variant name '{}'", variant)));
        }
    }

    // Dependencies must parse for every variant
    let mut bindings: Vec<&BTreeMap<String, String>> = rule.variants.values().collect();
    let empty = BTreeMap::new();
    if bindings.is_empty() {
        bindings.push(&empty);
    }
    for params in bindings {
        for (spec, parsed) in dependency_requests(&rule.dependencies.requires, params) {
            if let Err(e) = parsed {
                return Err(fail(format!("invalid dependency '{}': {}", spec, e)));
            }
        }
    }

    Ok(())
}

/// Dependency requests with variant parameters substituted
pub(crate) fn dependency_requests<'a>(
    requires: &'a [String],
    params: &BTreeMap<String, String>,
) -> Vec<(&'a str, Result<TargetId>)> {
    requires
        .iter()
        .map(|spec| (spec.as_str(), substitute(spec, params).parse::<TargetId>()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BINUTILS: &str = r#"
[package]
name = "binutils"

[dependencies]
requires = ["texinfo"]

[variants.arm-none-eabi]
target = "arm-none-eabi"

[configure]
style = "cross"
args = ["--disable-nls"]
"#;

    #[test]
    fn test_parse_cross_rule() {
        let rule = parse_rule("binutils", BINUTILS).unwrap();
        validate_rule("binutils", &rule).unwrap();

        let configure = rule.configure.as_ref().unwrap();
        assert_eq!(configure.style, ConfigureStyle::Cross);
        assert_eq!(configure.args, vec!["--disable-nls"]);
        assert_eq!(rule.variants["arm-none-eabi"]["target"], "arm-none-eabi");
        assert_eq!(rule.build_command(), "make %(jobs)s");
        assert_eq!(
            rule.git_url("git://example.org/").as_deref(),
            Some("git://example.org/binutils")
        );
    }

    #[test]
    fn test_name_must_match_file() {
        let rule = parse_rule("gas", BINUTILS).unwrap();
        let err = validate_rule("gas", &rule).unwrap_err();
        assert!(matches!(err, Error::RuleLoad { .. }));
    }

    #[test]
    fn test_malformed_toml() {
        let err = parse_rule("gmp", "[package\nname = ").unwrap_err();
        assert!(matches!(err, Error::RuleLoad { .. }));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = parse_rule("gmp", "[package]\nname = \"gmp\"\nversion = \"6\"\n").unwrap_err();
        assert!(matches!(err, Error::RuleLoad { .. }));
    }

    #[test]
    fn test_missing_configure() {
        let rule = parse_rule("gmp", "[package]\nname = \"gmp\"\n").unwrap();
        assert!(validate_rule("gmp", &rule).is_err());
    }

    #[test]
    fn test_group_needs_no_configure() {
        let rule = parse_rule(
            "arm-toolchain",
            r#"
[package]
name = "arm-toolchain"
group = true

[dependencies]
requires = ["gcc@arm-none-eabi", "binutils@arm-none-eabi"]
"#,
        )
        .unwrap();
        validate_rule("arm-toolchain", &rule).unwrap();
        assert!(rule.git_url("git://example.org/").is_none());
    }

    #[test]
    fn test_cross_variant_needs_target() {
        let rule = parse_rule(
            "gdb",
            r#"
[package]
name = "gdb"

[variants.arm]
abi = "eabi"

[configure]
style = "cross"
"#,
        )
        .unwrap();
        assert!(validate_rule("gdb", &rule).is_err());
    }

    #[test]
    fn test_dependency_substitution() {
        let mut params = BTreeMap::new();
        params.insert("target".to_string(), "arm-none-eabi".to_string());
        let requires = vec!["texinfo".to_string(), "binutils@%(target)s".to_string()];

        let ids: Vec<TargetId> = dependency_requests(&requires, &params)
            .into_iter()
            .map(|(_, id)| id.unwrap())
            .collect();
        assert_eq!(
            ids,
            vec![
                TargetId::new("texinfo"),
                TargetId::with_variant("binutils", "arm-none-eabi")
            ]
        );
    }

    #[test]
    fn test_conflicting_sources() {
        let rule = parse_rule(
            "gmp",
            r#"
[package]
name = "gmp"

[source]
git = "git://example.org/gmp"
path = "vendor/gmp"

[configure]
"#,
        )
        .unwrap();
        assert!(validate_rule("gmp", &rule).is_err());
    }
}
