use thiserror::Error;

/// Core error type for the Waypoint engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Flow definition not found
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// Step definition not found
    #[error("Step not found: {0}")]
    StepNotFound(String),

    /// Malformed definition rejected at registration time
    #[error("Registration error: {0}")]
    RegistrationError(String),

    /// Module registration failure
    #[error("Module registration error: {0}")]
    ModuleRegistrationError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Step execution error
    #[error("Step execution error: {0}")]
    StepExecutionError(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Input/output error
    #[error("Input/output error: {0}")]
    IOError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::IOError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_error_display() {
        let errors = vec![
            (CoreError::FlowNotFound("login".to_string()), "Flow not found: login"),
            (CoreError::StepNotFound("verify".to_string()), "Step not found: verify"),
            (CoreError::RegistrationError("empty id".to_string()), "Registration error: empty id"),
            (
                CoreError::ModuleRegistrationError("timed out".to_string()),
                "Module registration error: timed out",
            ),
            (CoreError::ValidationError("invalid".to_string()), "Validation error: invalid"),
            (CoreError::StepExecutionError("boom".to_string()), "Step execution error: boom"),
            (CoreError::StateStoreError("db_err".to_string()), "State store error: db_err"),
            (CoreError::SerializationError("ser_err".to_string()), "Serialization error: ser_err"),
            (CoreError::IOError("io_err".to_string()), "Input/output error: io_err"),
            (CoreError::Other("other_err".to_string()), "other_err"),
        ];

        for (error, expected_msg) in errors {
            assert_eq!(error.to_string(), expected_msg);
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: CoreError = json_error.into();

        match error {
            CoreError::SerializationError(msg) => {
                assert!(msg.contains("expected value"));
            }
            _ => panic!("Expected SerializationError variant"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_error = IoError::new(ErrorKind::NotFound, "file not found");
        let error: CoreError = io_error.into();

        match error {
            CoreError::IOError(msg) => {
                assert!(msg.contains("file not found"));
            }
            _ => panic!("Expected IOError variant"),
        }
    }

    #[test]
    fn test_from_string_and_str() {
        let error: CoreError = "test error message".to_string().into();
        assert_eq!(error, CoreError::Other("test error message".to_string()));

        let error: CoreError = "test error message".into();
        assert_eq!(error, CoreError::Other("test error message".to_string()));
    }
}
