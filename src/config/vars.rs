//! Environment variable expansion for config files.
//!
//! Supported forms:
//! - `$NAME` / `${NAME}`: required, error when unset
//! - `${NAME:-fallback}`: fallback when unset or empty
//! - `${NAME-fallback}`: fallback only when unset
//! - `$$`: a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<escape>\$\$)
        | \$\{ (?P<braced>[A-Za-z_][A-Za-z0-9_]*) (?: (?P<op>:?-) (?P<fallback>[^}]*) )? \}
        | \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("placeholder pattern is valid")
});

/// Expand every placeholder in `input`.
///
/// All unresolved variables are reported together so a single run shows
/// everything missing from the environment.
pub fn expand(input: &str) -> Result<String, Vec<String>> {
    let mut problems = Vec::new();
    let expanded = PLACEHOLDER.replace_all(input, |caps: &Captures| {
        match resolve(caps) {
            Ok(value) => value,
            Err(problem) => {
                problems.push(problem);
                caps[0].to_string()
            }
        }
    });

    if problems.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(problems)
    }
}

fn resolve(caps: &Captures) -> Result<String, String> {
    if caps.name("escape").is_some() {
        return Ok("$".to_string());
    }

    let name = caps
        .name("braced")
        .or_else(|| caps.name("bare"))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let empty_counts_as_unset = caps.name("op").is_some_and(|op| op.as_str() == ":-");
    let fallback = caps.name("fallback").map(|m| m.as_str());

    match (env::var(name), fallback) {
        (Ok(value), _) if value.contains(['\n', '\r']) => Err(format!(
            "environment variable '{name}' contains newlines, which is not allowed"
        )),
        (Ok(value), Some(fallback)) if value.is_empty() && empty_counts_as_unset => {
            Ok(fallback.to_string())
        }
        (Ok(value), _) => Ok(value),
        (Err(_), Some(fallback)) => Ok(fallback.to_string()),
        (Err(_), None) => Err(format!("environment variable '{name}' is not set")),
    }
}
