use std::path::PathBuf;

/// Why a settings file could not become a [`crate::MailctxSettings`].
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid JSON: {source}", path.display())]
    Syntax {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Well-formed JSON whose shape does not match the settings tree.
    #[error("settings shape mismatch: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("invalid settings value for `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

impl SettingsError {
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_value_names_the_key() {
        let err = SettingsError::invalid("analysis.acceptanceThreshold", "1.5 is not in [0, 1]");
        assert_eq!(
            err.to_string(),
            "invalid settings value for `analysis.acceptanceThreshold`: 1.5 is not in [0, 1]"
        );
    }

    #[test]
    fn file_errors_carry_the_path() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/mailctx/settings.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let text = err.to_string();
        assert!(text.starts_with("cannot read /etc/mailctx/settings.json"));
        assert!(text.ends_with("denied"));
    }

    #[test]
    fn shape_errors_convert_from_serde() {
        let bad = serde_json::from_value::<u32>(serde_json::json!("three")).unwrap_err();
        let err: SettingsError = bad.into();
        assert!(matches!(err, SettingsError::Shape(_)));
    }
}
