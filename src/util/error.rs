use std::error::Error;
use std::fmt;
use std::fmt::Formatter;
use strum_macros::Display;

#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash, Display)]
pub enum AFErrorCode {
    #[strum(serialize = "source_open_failed")]
    SourceOpenFailed,
    #[strum(serialize = "no_suitable_stream")]
    NoSuitableStream,
    #[strum(serialize = "configuration_invalid")]
    ConfigurationInvalid,
    #[strum(serialize = "native_operation_failed")]
    NativeOperationFailed,
    #[strum(serialize = "cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AFError {
    code: AFErrorCode,
    error: String,
}

impl Error for AFError {}

impl fmt::Display for AFError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "code: {}, error: {}", self.code, self.error)
    }
}

impl AFError {
    pub fn new(code: AFErrorCode, error: &dyn Error) -> AFError {
        AFError {
            code,
            error: error.to_string(),
        }
    }

    pub fn new_with_string(code: AFErrorCode, error: String) -> AFError {
        AFError {
            code,
            error,
        }
    }

    pub fn new_with_str(code: AFErrorCode, error: &'static str) -> AFError {
        AFError {
            code,
            error: error.to_string(),
        }
    }

    pub fn code(&self) -> AFErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.error
    }

    pub fn equal(&self, code: AFErrorCode) -> bool {
        self.code == code
    }
}

// Classify any propagated error chain by its originating code
pub fn error_code_of(err: &anyhow::Error) -> Option<AFErrorCode> {
    err.downcast_ref::<AFError>().map(|e| e.code)
}
