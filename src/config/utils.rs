/// Parse a boolean value from a string, supporting multiple formats
///
/// Accepts: "true", "false", "1", "0", "yes", "no" (case insensitive)
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parse a numeric environment value, naming the variable on failure.
pub fn parse_env_number<T>(name: &str, value: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| format!("Invalid {name} environment variable: {e}"))
}

/// Split a comma-separated list, dropping blank entries.
pub fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_true_variants() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool(" yes "), Some(true));
    }

    #[test]
    fn test_parse_bool_false_variants() {
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("NO"), Some(false));
    }

    #[test]
    fn test_parse_bool_invalid() {
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_parse_env_number() {
        assert_eq!(parse_env_number::<u32>("INPUT_BUFFER_MS", "80"), Ok(80));
        let err = parse_env_number::<u16>("PORT", "http").unwrap_err();
        assert!(err.starts_with("Invalid PORT environment variable"));
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list("stun:a:3478, turn:b:3478,,"),
            vec!["stun:a:3478".to_string(), "turn:b:3478".to_string()]
        );
        assert!(parse_list(" ").is_empty());
    }
}
