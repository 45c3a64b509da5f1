//! Identifier checks applied before anything reaches a runner argument list.

use thiserror::Error;

/// Longest accepted project id.
pub const MAX_PROJECT_ID_LEN: usize = 128;

/// Longest accepted grep filter.
pub const MAX_GREP_LEN: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} cannot start with '{first}'")]
    LeadingChar { field: &'static str, first: char },

    #[error("{field} contains disallowed character {ch:?}")]
    DisallowedChar { field: &'static str, ch: char },
}

/// Validate a project id: `[A-Za-z0-9._-]`, not starting with `-` or `.`.
pub fn validate_project_id(id: &str) -> Result<(), ValidationError> {
    const FIELD: &str = "project id";
    check_common(FIELD, id, MAX_PROJECT_ID_LEN)?;
    if id.starts_with('.') {
        return Err(ValidationError::LeadingChar { field: FIELD, first: '.' });
    }
    if let Some(ch) = id
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '_' | '-'))
    {
        return Err(ValidationError::DisallowedChar { field: FIELD, ch });
    }
    Ok(())
}

/// Validate a grep filter forwarded as a single runner argument.
///
/// Shell metacharacters are rejected outright even though arguments never
/// pass through a shell.
pub fn validate_grep(grep: &str) -> Result<(), ValidationError> {
    const FIELD: &str = "grep";
    check_common(FIELD, grep, MAX_GREP_LEN)?;
    if let Some(ch) = grep.chars().find(|c| !is_grep_char(*c)) {
        return Err(ValidationError::DisallowedChar { field: FIELD, ch });
    }
    Ok(())
}

/// Validate an optional grep, treating blank input as "no filter".
pub fn normalize_grep(grep: Option<&str>) -> Result<Option<String>, ValidationError> {
    match grep.map(str::trim) {
        None | Some("") => Ok(None),
        Some(g) => {
            validate_grep(g)?;
            Ok(Some(g.to_string()))
        }
    }
}

fn check_common(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    if value.starts_with('-') {
        return Err(ValidationError::LeadingChar { field, first: '-' });
    }
    Ok(())
}

fn is_grep_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-' | '@' | ':' | '/' | ',' | '[' | ']' | '+')
}
