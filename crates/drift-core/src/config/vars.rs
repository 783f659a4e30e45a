//! Environment variable interpolation for config files.
//!
//! - `$VAR` or `${VAR}` substitutes the variable, error if missing
//! - `${VAR:-default}` falls back when VAR is unset or empty
//! - `${VAR-default}` falls back only when VAR is unset
//! - `$$` is a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{ ([A-Za-z_][A-Za-z0-9_]*) (?: (:?-) ([^}]*) )? \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("Invalid regex pattern")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every unresolved or rejected variable, in order of appearance.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in `input`.
///
/// Errors are collected rather than returned early so that a broken config
/// reports every missing variable in one go.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| match resolve(caps) {
            Ok(value) => value,
            Err(message) => {
                errors.push(message);
                caps[0].to_string()
            }
        })
        .into_owned();

    InterpolationResult { text, errors }
}

fn resolve(caps: &Captures) -> Result<String, String> {
    if &caps[0] == "$$" {
        return Ok("$".to_string());
    }

    let name = caps
        .get(1)
        .or_else(|| caps.get(4))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let empty_falls_back = caps.get(2).is_some_and(|m| m.as_str() == ":-");
    let default = caps.get(3).map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains(['\n', '\r']) => Err(format!(
            "environment variable '{name}' contains newlines, which is not allowed"
        )),
        Ok(value) if value.is_empty() && empty_falls_back => {
            Ok(default.unwrap_or_default().to_string())
        }
        Ok(value) => Ok(value),
        Err(_) => default
            .map(str::to_string)
            .ok_or_else(|| format!("environment variable '{name}' is not set")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // SAFETY (for the set_var/remove_var calls below): each test uses its own
    // variable names so concurrent tests never touch the same key.

    #[test]
    fn test_queue_name_from_env() {
        unsafe { env::set_var("DRIFT_TEST_QUEUE", "load_q") };
        let result = interpolate("primary: ${DRIFT_TEST_QUEUE}");
        assert!(result.is_ok());
        assert_eq!(result.text, "primary: load_q");
    }

    #[test]
    fn test_unbraced_variable() {
        unsafe { env::set_var("DRIFT_TEST_SOURCE", "OPENSANCTIONS") };
        let result = interpolate("data_source: $DRIFT_TEST_SOURCE");
        assert_eq!(result.text, "data_source: OPENSANCTIONS");
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        unsafe {
            env::remove_var("DRIFT_TEST_MISSING_A");
            env::remove_var("DRIFT_TEST_MISSING_B");
        }
        let result = interpolate("a: $DRIFT_TEST_MISSING_A\nb: ${DRIFT_TEST_MISSING_B}");
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("DRIFT_TEST_MISSING_A"));
        assert!(result.errors[1].contains("not set"));
        assert!(result.text.contains("$DRIFT_TEST_MISSING_A"));
    }

    #[test]
    fn test_colon_default_applies_to_empty_value() {
        unsafe { env::set_var("DRIFT_TEST_EMPTY", "") };
        let result = interpolate("url: ${DRIFT_TEST_EMPTY:-http://localhost}");
        assert_eq!(result.text, "url: http://localhost");

        let result = interpolate("url: ${DRIFT_TEST_EMPTY-http://localhost}");
        assert_eq!(result.text, "url: ");
    }

    #[test]
    fn test_newline_injection_rejected() {
        unsafe { env::set_var("DRIFT_TEST_NEWLINE", "a\nb") };
        let result = interpolate("x: $DRIFT_TEST_NEWLINE");
        assert!(!result.is_ok());
        assert!(result.errors[0].contains("newlines"));
    }

    #[test]
    fn test_dollar_escape() {
        let result = interpolate("comment: costs $$5");
        assert!(result.is_ok());
        assert_eq!(result.text, "comment: costs $5");
    }
}
