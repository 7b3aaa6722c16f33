use std::fs;
use std::path::Path;

use anyhow::Context;
use rfq_core::cpq::discount_rules::normalize;
use rfq_core::{DiscountRuleSet, DiscountTier, EngineError};

use crate::commands::{to_data, CommandResult, Failure};

/// Normalizes a JSON array of discount tiers without touching the database.
pub fn run(path: &Path) -> CommandResult {
    let tiers = match read_tiers(path) {
        Ok(tiers) => tiers,
        Err(error) => {
            return CommandResult::failure("validate-rules", "input", format!("{error:#}"), 2);
        }
    };

    let rules = match normalize(tiers) {
        Ok(rules) => rules,
        Err(error) => {
            let failure = Failure::engine("validate-rules", EngineError::Validation(error));
            return CommandResult::failure(
                "validate-rules",
                &failure.error_class,
                failure.message,
                failure.exit_code,
            );
        }
    };

    match to_data(&rules) {
        Ok(data) => CommandResult::success_with("validate-rules", summary(&rules), data),
        Err(failure) => CommandResult::failure(
            "validate-rules",
            &failure.error_class,
            failure.message,
            failure.exit_code,
        ),
    }
}

fn read_tiers(path: &Path) -> anyhow::Result<Vec<DiscountTier>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read rules file `{}`", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("rules file `{}` is not a JSON array of tiers", path.display()))
}

fn summary(rules: &DiscountRuleSet) -> String {
    let top = rules.tiers().last().map(|tier| tier.max_discount_pct).unwrap_or_default();
    format!("{} tiers form a valid rule set; discounts reach {top}%", rules.tiers().len())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::Value;

    use super::run;

    fn rules_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write rules");
        file
    }

    #[test]
    fn unordered_rules_come_back_sorted() {
        let file = rules_file(
            r#"[
                {"lower_bound": "1000", "upper_bound": null, "max_discount_pct": "10"},
                {"lower_bound": "0", "upper_bound": "1000", "max_discount_pct": "5"}
            ]"#,
        );
        let result = run(file.path());
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 0, "{}", result.output);
        assert_eq!(payload["data"][0]["lower_bound"], "0");
        assert_eq!(payload["data"][1]["max_discount_pct"], "10");
    }

    #[test]
    fn gaps_are_reported_as_bad_requests() {
        let file = rules_file(
            r#"[
                {"lower_bound": "0", "upper_bound": "500", "max_discount_pct": "5"},
                {"lower_bound": "1000", "upper_bound": null, "max_discount_pct": "10"}
            ]"#,
        );
        let result = run(file.path());
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 7);
        assert_eq!(payload["error_class"], "bad_request");
    }

    #[test]
    fn unreadable_input_is_an_input_error() {
        let file = rules_file("not json");
        let result = run(file.path());
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 2);
        assert_eq!(payload["error_class"], "input");
    }
}
