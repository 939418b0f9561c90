// cached-purifier/src/sanitizers/regex_sanitizer.rs
//! A `Sanitizer` implementation that applies ordered regex rewrite rules.
//!
//! This is a deliberately small rule runner, not a markup parser. It exists so
//! the gate works out of the box; hosts with a real purifier plug theirs in
//! through the `Sanitizer` trait.
//! License: MIT OR APACHE 2.0

use anyhow::{Context, Result};
use log::debug;
use std::borrow::Cow;

use crate::config::RuleConfig;
use crate::sanitizer::Sanitizer;
use crate::sanitizers::compiler::get_or_compile_rules;

#[derive(Debug, Default, Clone, Copy)]
pub struct RegexSanitizer;

impl RegexSanitizer {
    pub fn new() -> Self {
        Self
    }
}

impl Sanitizer for RegexSanitizer {
    fn sanitize(&self, input: &str, config: &RuleConfig) -> Result<String> {
        let compiled = get_or_compile_rules(config)
            .context("Failed to compile sanitize rules for RegexSanitizer")?;

        let mut output = input.to_string();
        for rule in &compiled.rules {
            let rewritten = match rule.regex.replace_all(&output, rule.replace_with.as_str()) {
                Cow::Borrowed(_) => continue,
                Cow::Owned(rewritten) => rewritten,
            };
            debug!(target: "cached_purifier::sanitizer", "Rule '{}' rewrote input.", rule.name);
            output = rewritten;
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SanitizeRule;

    fn defaults() -> RuleConfig {
        RuleConfig::load_default_rules().expect("embedded rules parse")
    }

    #[test]
    fn strips_script_and_keeps_markup() -> Result<()> {
        let out = RegexSanitizer.sanitize("<script>alert(1)</script><b>hi</b>", &defaults())?;
        assert_eq!(out, "<b>hi</b>");
        Ok(())
    }

    #[test]
    fn strips_multiline_script_case_insensitively() -> Result<()> {
        let input = "<p>a</p><SCRIPT type=\"text/javascript\">\nlet x = 1;\n</Script ><p>b</p>";
        assert_eq!(RegexSanitizer.sanitize(input, &defaults())?, "<p>a</p><p>b</p>");
        Ok(())
    }

    #[test]
    fn removes_event_handlers_and_javascript_urls() -> Result<()> {
        let input = r#"<a href="javascript:evil()" onclick="evil()">x</a><img src='javascript:x' onerror=evil()>"#;
        let out = RegexSanitizer.sanitize(input, &defaults())?;
        assert_eq!(out, r##"<a href="#">x</a><img src="#">"##);

        let unquoted = RegexSanitizer.sanitize("<a href=javascript:alert(1)>x</a>", &defaults())?;
        assert_eq!(unquoted, r##"<a href="#">x</a>"##);
        let mixed_case = RegexSanitizer.sanitize("<a HREF = JavaScript:alert(1) title=t>x</a>", &defaults())?;
        assert_eq!(mixed_case, r##"<a HREF="#" title=t>x</a>"##);

        let slash = RegexSanitizer.sanitize("<img/onerror=alert(1) src=x>", &defaults())?;
        assert_eq!(slash, "<img src=x>");
        let slash_quoted = RegexSanitizer.sanitize(r#"<svg/onload="go()"/>"#, &defaults())?;
        assert_eq!(slash_quoted, "<svg/>");
        Ok(())
    }

    #[test]
    fn removes_iframes_and_styles() -> Result<()> {
        let input = "<style>p{}</style><iframe src=\"https://x\"></iframe><p>ok</p><embed src=a>";
        assert_eq!(RegexSanitizer.sanitize(input, &defaults())?, "<p>ok</p>");
        Ok(())
    }

    #[test]
    fn clean_input_is_returned_unchanged() -> Result<()> {
        assert_eq!(RegexSanitizer.sanitize("plain <i>text</i>", &defaults())?, "plain <i>text</i>");
        assert_eq!(RegexSanitizer.sanitize("", &defaults())?, "");
        Ok(())
    }

    #[test]
    fn group_references_are_expanded() -> Result<()> {
        let config = RuleConfig {
            rules: vec![SanitizeRule {
                name: "swap_tag".into(),
                pattern: Some(r"<(/?)em>".into()),
                replace_with: "<${1}i>".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(RegexSanitizer.sanitize("<em>x</em>", &config)?, "<i>x</i>");
        Ok(())
    }

    #[test]
    fn invalid_rules_surface_as_errors() {
        let config = RuleConfig {
            rules: vec![SanitizeRule {
                name: "bad".into(),
                pattern: Some("[".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(RegexSanitizer.sanitize("x", &config).is_err());
    }
}
