//! Identifier validation for SQL injection prevention

use crate::error::DatabaseError;

/// Maximum length of a single identifier part
const MAX_IDENTIFIER_LEN: usize = 64;

/// Validate a single identifier that will be interpolated into SQL text
///
/// Procedure names in `CALL`/`SELECT * FROM` statements and database names
/// in `USE` statements cannot be bound as parameters, so they are checked
/// before being spliced into the statement.
///
/// ## Validation Rules
///
/// - **Length**: 1-64 characters
/// - **Characters**: Only alphanumeric, underscore and `$` (`[a-zA-Z0-9_$]`)
/// - **Start character**: Must be letter or underscore (not digit or `$`)
///
/// ## Example
///
/// ```rust
/// use kodegen_tools_db_sessions::validate::validate_identifier;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// validate_identifier("monthly_report")?;
/// validate_identifier("_staging")?;
/// # assert!(validate_identifier("report; DROP TABLE users").is_err());
/// # assert!(validate_identifier("9lives").is_err());
/// # assert!(validate_identifier("").is_err());
/// # Ok(())
/// # }
/// ```
pub fn validate_identifier(name: &str) -> Result<(), DatabaseError> {
    if name.is_empty() {
        return Err(DatabaseError::InvalidIdentifier(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(DatabaseError::InvalidIdentifier(format!(
            "Identifier too long: {} characters (max {})",
            name.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return Err(DatabaseError::InvalidIdentifier(format!(
            "'{}'. Only alphanumeric, underscore and $ allowed",
            name
        )));
    }

    if let Some(first_char) = name.chars().next()
        && (first_char.is_ascii_digit() || first_char == '$')
    {
        return Err(DatabaseError::InvalidIdentifier(format!(
            "Identifier must start with a letter or underscore: '{}'",
            name
        )));
    }

    Ok(())
}

/// Validate a procedure name, optionally qualified as `schema.name`
///
/// Square brackets around either part (`[dbo].[usp_report]`) are accepted
/// and stripped. Returns the bare parts in order.
///
/// # Errors
/// Returns `DatabaseError::InvalidIdentifier` if there are more than two
/// parts or any part fails [`validate_identifier`].
pub fn validate_qualified_name(name: &str) -> Result<Vec<String>, DatabaseError> {
    let parts: Vec<String> = name
        .trim()
        .split('.')
        .map(|part| {
            part.trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string()
        })
        .collect();

    if parts.len() > 2 {
        return Err(DatabaseError::InvalidIdentifier(format!(
            "'{}'. Expected 'name' or 'schema.name'",
            name
        )));
    }

    for part in &parts {
        validate_identifier(part)?;
    }

    Ok(parts)
}
