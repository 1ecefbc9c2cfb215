use std::path::Path;

use dotenv::from_path;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IDENTIFIER_REGEX: Regex =
        Regex::new(r"^[a-z_][a-z0-9_]*$").expect("identifier regex is valid");
}

// Postgres truncates identifiers beyond this, which would silently change
// which table a routed call hits.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Checks a single SQL identifier part (table, schema or column name) against
/// strict lower_snake_case syntax. Anything else is rejected before it can
/// reach generated query text.
pub fn is_valid_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier.len() <= MAX_IDENTIFIER_LENGTH
        && IDENTIFIER_REGEX.is_match(identifier)
}

/// Checks a table name which may be schema-qualified (`schema.table`).
pub fn is_valid_table_name(table_name: &str) -> bool {
    let parts: Vec<&str> = table_name.split('.').collect();
    match parts.as_slice() {
        [table] => is_valid_identifier(table),
        [schema, table] => is_valid_identifier(schema) && is_valid_identifier(table),
        _ => false,
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadEnvError {
    #[error("Could not load env file: {0}")]
    UnableToLoadEnv(#[from] dotenv::Error),
}

pub fn load_env_from_path(path: &Path) -> Result<(), LoadEnvError> {
    from_path(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_is_valid_identifier() {
        // Success cases
        assert!(is_valid_identifier("users"));
        assert!(is_valid_identifier("user_accounts"));
        assert!(is_valid_identifier("_internal"));
        assert!(is_valid_identifier("t2"));

        // Failures
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("Users")); // uppercase
        assert!(!is_valid_identifier("2users")); // leading digit
        assert!(!is_valid_identifier("users;drop table users"));
        assert!(!is_valid_identifier("users--"));
        assert!(!is_valid_identifier("users table"));
        assert!(!is_valid_identifier("users\""));
        assert!(!is_valid_identifier(&"a".repeat(64))); // too long
        assert!(is_valid_identifier(&"a".repeat(63)));
    }

    #[test]
    fn test_is_valid_table_name() {
        assert!(is_valid_table_name("users"));
        assert!(is_valid_table_name("public.users"));
        assert!(is_valid_table_name("tenant_7.users_2024"));

        assert!(!is_valid_table_name("public.users.extra"));
        assert!(!is_valid_table_name(".users"));
        assert!(!is_valid_table_name("public."));
        assert!(!is_valid_table_name("public.Users"));
        assert!(!is_valid_table_name("public.users; --"));
    }

    #[test]
    fn test_load_env_from_path() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "ROWBATCH_TEST_ENV_KEY=loaded").expect("write env file");

        load_env_from_path(file.path()).expect("env file should load");
        assert_eq!(std::env::var("ROWBATCH_TEST_ENV_KEY").unwrap(), "loaded");
    }

    #[test]
    fn test_load_env_from_missing_path() {
        let result = load_env_from_path(Path::new("/definitely/not/here/.env"));
        assert!(result.is_err());
    }
}
