use thiserror::Error;

/// Main error type for the Anvil EBGAN losses
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnvilError {
    /// Shape-related errors with detailed suggestions
    #[error("Shape error: {0}")]
    ShapeError(String),

    /// Device-related errors
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Operation errors with context
    #[error("Operation error: {operation} - {message}")]
    OperationError {
        operation: String,
        message: String,
    },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Incompatible model/loss wiring. Never retried.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid state errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// IO errors
    #[error("IO error: {0}")]
    IoError(String),
}

impl AnvilError {
    /// Create a shape error with helpful suggestions
    pub fn shape_error(expected: &str, got: &str, suggestion: Option<&str>) -> Self {
        let message = if let Some(sugg) = suggestion {
            format!("Expected {}, got {}. Suggestion: {}", expected, got, sugg)
        } else {
            format!("Expected {}, got {}", expected, got)
        };
        AnvilError::ShapeError(message)
    }

    /// Create an operation error with context
    pub fn operation_error(operation: &str, message: &str) -> Self {
        AnvilError::OperationError {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a device error with helpful context
    pub fn device_error(device: &str, message: &str) -> Self {
        AnvilError::DeviceError(format!("Device '{}': {}", device, message))
    }
}

impl From<std::io::Error> for AnvilError {
    fn from(err: std::io::Error) -> Self {
        AnvilError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AnvilError {
    fn from(err: serde_json::Error) -> Self {
        AnvilError::SerializationError(err.to_string())
    }
}

/// Result type for Anvil operations
pub type AnvilResult<T> = Result<T, AnvilError>;

/// Error context for providing additional debugging information
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: String,
    pub tensor_shapes: Vec<String>,
    pub device_info: String,
    pub suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            tensor_shapes: Vec::new(),
            device_info: String::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_shape(mut self, shape: &str) -> Self {
        self.tensor_shapes.push(shape.to_string());
        self
    }

    pub fn with_device(mut self, device: &str) -> Self {
        self.device_info = device.to_string();
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestions.push(suggestion.to_string());
        self
    }

    pub fn to_error_message(&self) -> String {
        let mut message = format!("Operation: {}", self.operation);

        if !self.tensor_shapes.is_empty() {
            message.push_str(&format!("\nTensor shapes: {}", self.tensor_shapes.join(", ")));
        }

        if !self.device_info.is_empty() {
            message.push_str(&format!("\nDevice: {}", self.device_info));
        }

        if !self.suggestions.is_empty() {
            message.push_str("\nSuggestions:");
            for suggestion in &self.suggestions {
                message.push_str(&format!("\n  - {}", suggestion));
            }
        }

        message
    }
}

/// Helper trait for adding context to errors
pub trait WithContext<T> {
    fn with_context<F>(self, f: F) -> AnvilResult<T>
    where
        F: FnOnce() -> ErrorContext;
}

impl<T> WithContext<T> for AnvilResult<T> {
    fn with_context<F>(self, f: F) -> AnvilResult<T>
    where
        F: FnOnce() -> ErrorContext,
    {
        self.map_err(|e| {
            let context = f();
            match e {
                AnvilError::ShapeError(msg) => {
                    AnvilError::ShapeError(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                AnvilError::OperationError { operation, message } => {
                    AnvilError::OperationError {
                        operation,
                        message: format!("{}\nContext: {}", message, context.to_error_message()),
                    }
                }
                AnvilError::InvalidInput(msg) => {
                    AnvilError::InvalidInput(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                _ => e,
            }
        })
    }
}

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ShapeMismatch,
    DeviceNotFound,
    InvalidOperation,
    SerializationFailed,
    ConfigInvalid,
}

impl AnvilError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AnvilError::ShapeError(_) => ErrorCode::ShapeMismatch,
            AnvilError::DeviceError(_) => ErrorCode::DeviceNotFound,
            AnvilError::OperationError { .. } => ErrorCode::InvalidOperation,
            AnvilError::SerializationError(_) => ErrorCode::SerializationFailed,
            AnvilError::ConfigurationError(_) => ErrorCode::ConfigInvalid,
            AnvilError::InvalidInput(_) => ErrorCode::InvalidOperation,
            AnvilError::InvalidState(_) => ErrorCode::InvalidOperation,
            AnvilError::IoError(_) => ErrorCode::InvalidOperation,
        }
    }

    /// Device errors can be recovered from by falling back to the CPU. A
    /// mismatched generator/discriminator pair cannot.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.code(), ErrorCode::DeviceNotFound)
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            AnvilError::ShapeError(msg) => {
                format!("Shape Error: {}\n\nThe scores or embeddings passed to the loss do not have matching batch dimensions. Check the shapes returned by your discriminator.", msg)
            }
            AnvilError::DeviceError(msg) => {
                format!("Device Error: {}\n\nThe requested device has no kernels in this build. Use Device::Cpu.", msg)
            }
            AnvilError::ConfigurationError(msg) => {
                format!("Configuration Error: {}\n\nThe generator, discriminator and loss are not compatible. Fix the model pair passed to train_ops.", msg)
            }
            AnvilError::InvalidState(msg) => {
                format!("Invalid State: {}\n\nThe operation could not be performed because the models are in an invalid state. Please check your workflow.", msg)
            }
            _ => self.to_string(),
        }
    }
}
