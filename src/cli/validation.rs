//! CLI argument validation functions
//!
//! Value parsers for arguments clap cannot check on its own.

use std::fs;
use std::path::PathBuf;

/// Upper bound for `--poll-interval`, one hour
const MAX_POLL_INTERVAL_MS: u64 = 3_600_000;

/// Validate that a file path is accessible (exists and is readable)
pub fn validate_config_file_path(path_str: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(format!("Configuration file does not exist: '{}'", path_str));
    }

    if !path.is_file() {
        return Err(format!("Configuration path is not a file: '{}'", path_str));
    }

    match fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) => Err(format!("Cannot read configuration file '{}': {}", path_str, e)),
    }
}

/// Validate a count limit such as `--limit` or `--failure-limit`
pub fn validate_positive_count(value: &str) -> Result<usize, String> {
    let count: usize = value
        .parse()
        .map_err(|_| format!("Expected a positive number, got: '{}'", value))?;

    if count == 0 {
        return Err("Value must be greater than 0".to_string());
    }

    Ok(count)
}

/// Validate a duration in seconds such as `--time-limit`
pub fn validate_positive_secs(value: &str) -> Result<u64, String> {
    let secs: u64 = value
        .parse()
        .map_err(|_| format!("Expected a number of seconds, got: '{}'", value))?;

    if secs == 0 {
        return Err("Duration must be at least 1 second".to_string());
    }

    Ok(secs)
}

/// Validate `--poll-interval` in milliseconds
pub fn validate_poll_interval(value: &str) -> Result<u64, String> {
    let ms: u64 = value
        .parse()
        .map_err(|_| format!("Poll interval must be a number of milliseconds, got: '{}'", value))?;

    if ms == 0 {
        return Err("Poll interval must be greater than 0 milliseconds".to_string());
    }

    if ms > MAX_POLL_INTERVAL_MS {
        return Err(format!(
            "Poll interval cannot exceed {} milliseconds (one hour)",
            MAX_POLL_INTERVAL_MS
        ));
    }

    Ok(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_file_path_validation() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        assert_eq!(validate_config_file_path(path).unwrap(), PathBuf::from(path));

        let result = validate_config_file_path("/nonexistent/cadence.toml");
        assert!(result.unwrap_err().contains("does not exist"));

        let dir = tempfile::tempdir().unwrap();
        let result = validate_config_file_path(dir.path().to_str().unwrap());
        assert!(result.unwrap_err().contains("not a file"));
    }

    #[test]
    fn test_positive_count_validation() {
        for value in ["1", "10", "1000"] {
            assert!(validate_positive_count(value).is_ok(), "{} should be valid", value);
        }
        for value in ["0", "-1", "abc", ""] {
            assert!(validate_positive_count(value).is_err(), "{} should be invalid", value);
        }
    }

    #[test]
    fn test_positive_secs_validation() {
        assert_eq!(validate_positive_secs("60"), Ok(60));
        assert!(validate_positive_secs("0").is_err());
        assert!(validate_positive_secs("1.5").is_err());
    }

    #[test]
    fn test_poll_interval_validation() {
        assert_eq!(validate_poll_interval("250"), Ok(250));
        assert_eq!(validate_poll_interval("3600000"), Ok(3_600_000));
        assert!(validate_poll_interval("0").is_err());
        assert!(validate_poll_interval("3600001").is_err());
        assert!(validate_poll_interval("fast").is_err());
    }
}
