use std::path::PathBuf;

use super::{AuthApiSecret, TlsConfig};

/// Validate API secret entries
///
/// Ids and secrets must be non-empty and ids unique.
pub fn validate_auth_api_secrets(
    secrets: &[AuthApiSecret],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut seen = std::collections::HashSet::new();
    for entry in secrets {
        if entry.id.trim().is_empty() {
            return Err("API secret entries require a non-empty id".into());
        }
        if entry.secret.is_empty() {
            return Err(format!("API secret '{}' has an empty secret", entry.id).into());
        }
        if !seen.insert(entry.id.as_str()) {
            return Err(format!("Duplicate API secret id '{}'", entry.id).into());
        }
    }
    Ok(())
}

/// When auth is required at least one API secret must be configured.
pub fn validate_auth_required(
    auth_required: bool,
    secrets: &[AuthApiSecret],
) -> Result<(), Box<dyn std::error::Error>> {
    if auth_required && secrets.is_empty() {
        return Err(
            "When AUTH_REQUIRED=true, AUTH_API_SECRET or AUTH_API_SECRETS_JSON must be configured"
                .into(),
        );
    }
    Ok(())
}

/// Validate call framing durations.
///
/// Both must be non-zero and an outbound frame may not be longer than the
/// inbound buffering window.
pub fn validate_frame_durations(
    input_buffer_ms: u32,
    output_frame_ms: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if input_buffer_ms == 0 {
        return Err("INPUT_BUFFER_MS must be greater than zero".into());
    }
    if output_frame_ms == 0 {
        return Err("OUTPUT_FRAME_MS must be greater than zero".into());
    }
    if output_frame_ms > input_buffer_ms {
        return Err(format!(
            "OUTPUT_FRAME_MS ({output_frame_ms}) must not exceed INPUT_BUFFER_MS ({input_buffer_ms})"
        )
        .into());
    }
    Ok(())
}

/// TLS files must exist when TLS is enabled.
pub fn validate_tls(tls: &Option<TlsConfig>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(tls) = tls {
        for (name, path) in [("TLS_CERT_PATH", &tls.cert_path), ("TLS_KEY_PATH", &tls.key_path)] {
            if !path.exists() {
                return Err(format!("{name} file does not exist: {}", path.display()).into());
            }
        }
    }
    Ok(())
}

/// Vonage needs both the application id and its private key.
pub fn validate_vonage(
    application_id: &Option<String>,
    private_key_path: &Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    match (application_id, private_key_path) {
        (Some(_), None) => {
            Err("VONAGE_PRIVATE_KEY_PATH is required when VONAGE_APPLICATION_ID is set".into())
        }
        (None, Some(_)) => {
            Err("VONAGE_APPLICATION_ID is required when VONAGE_PRIVATE_KEY_PATH is set".into())
        }
        (Some(_), Some(path)) if !path.exists() => Err(format!(
            "VONAGE_PRIVATE_KEY_PATH file does not exist: {}",
            path.display()
        )
        .into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn secret(id: &str, secret: &str) -> AuthApiSecret {
        AuthApiSecret {
            id: id.to_string(),
            secret: secret.to_string(),
        }
    }

    #[test]
    fn test_auth_required_needs_secret() {
        assert!(validate_auth_required(false, &[]).is_ok());
        assert!(validate_auth_required(true, &[]).is_err());
        assert!(validate_auth_required(true, &[secret("a", "s")]).is_ok());
    }

    #[test]
    fn test_api_secret_entries() {
        assert!(validate_auth_api_secrets(&[secret("a", "1"), secret("b", "2")]).is_ok());
        assert!(validate_auth_api_secrets(&[secret(" ", "1")]).is_err());
        assert!(validate_auth_api_secrets(&[secret("a", "")]).is_err());
        let err = validate_auth_api_secrets(&[secret("a", "1"), secret("a", "2")]).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_frame_durations() {
        assert!(validate_frame_durations(60, 20).is_ok());
        assert!(validate_frame_durations(20, 20).is_ok());
        assert!(validate_frame_durations(0, 20).is_err());
        assert!(validate_frame_durations(60, 0).is_err());
        assert!(validate_frame_durations(20, 60).is_err());
    }

    #[test]
    fn test_vonage_pairing() {
        let key = NamedTempFile::new().unwrap();
        let key_path = Some(key.path().to_path_buf());

        assert!(validate_vonage(&None, &None).is_ok());
        assert!(validate_vonage(&Some("app".into()), &key_path).is_ok());
        assert!(validate_vonage(&Some("app".into()), &None).is_err());
        assert!(validate_vonage(&None, &key_path).is_err());
        assert!(
            validate_vonage(&Some("app".into()), &Some(PathBuf::from("/nonexistent/key.pem")))
                .is_err()
        );
    }

    #[test]
    fn test_tls_files_must_exist() {
        assert!(validate_tls(&None).is_ok());
        let missing = Some(TlsConfig {
            cert_path: PathBuf::from("/nonexistent/cert.pem"),
            key_path: PathBuf::from("/nonexistent/key.pem"),
        });
        assert!(validate_tls(&missing).is_err());
    }
}
