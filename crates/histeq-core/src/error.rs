//! Error taxonomy shared by the orchestrator and both device backends.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::stages::Stage;

/// Coarse classification used when reporting a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Empty or malformed input, rejected before any device work.
    InvalidInput,
    /// Context, program build, dispatch or verification failure.
    Device,
    /// Failed or partial host/device copy.
    Transfer,
    /// Image decode/encode outside the pipeline.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::Device => "device error",
            ErrorKind::Transfer => "transfer error",
            ErrorKind::Io => "image i/o error",
        };
        f.write_str(name)
    }
}

/// The device operation that was in flight when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Setup,
    Resolve,
    Allocate,
    Upload,
    Fill,
    Dispatch,
    Readback,
    Verify,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Setup => "setup",
            Operation::Resolve => "kernel resolve",
            Operation::Allocate => "buffer allocation",
            Operation::Upload => "upload",
            Operation::Fill => "buffer fill",
            Operation::Dispatch => "dispatch",
            Operation::Readback => "readback",
            Operation::Verify => "verification",
        };
        f.write_str(name)
    }
}

/// Where in a run an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorContext {
    pub stage: Option<Stage>,
    pub operation: Operation,
}

impl ErrorContext {
    pub fn new(operation: Operation) -> Self {
        Self {
            stage: None,
            operation,
        }
    }

    pub fn in_stage(stage: Stage, operation: Operation) -> Self {
        Self {
            stage: Some(stage),
            operation,
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{}, {}", stage, self.operation),
            None => write!(f, "{}", self.operation),
        }
    }
}

/// Errors that can end an equalisation run.
#[derive(Debug, Error)]
pub enum EqualizeError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{context}: {detail}")]
    Device {
        context: ErrorContext,
        detail: String,
    },

    #[error("program build failed: {detail}\nbuild log:\n{log}")]
    Build { detail: String, log: String },

    #[error("{context}: {detail}")]
    Transfer {
        context: ErrorContext,
        detail: String,
    },

    #[error("{}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl EqualizeError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        EqualizeError::InvalidInput(message.into())
    }

    pub fn device(operation: Operation, detail: impl Into<String>) -> Self {
        EqualizeError::Device {
            context: ErrorContext::new(operation),
            detail: detail.into(),
        }
    }

    pub fn transfer(operation: Operation, detail: impl Into<String>) -> Self {
        EqualizeError::Transfer {
            context: ErrorContext::new(operation),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EqualizeError::InvalidInput(_) => ErrorKind::InvalidInput,
            EqualizeError::Device { .. } | EqualizeError::Build { .. } => ErrorKind::Device,
            EqualizeError::Transfer { .. } => ErrorKind::Transfer,
            EqualizeError::Image { .. } => ErrorKind::Io,
        }
    }

    /// Context of a device or transfer error, if any.
    pub fn context(&self) -> Option<ErrorContext> {
        match self {
            EqualizeError::Device { context, .. } | EqualizeError::Transfer { context, .. } => {
                Some(*context)
            }
            _ => None,
        }
    }

    /// Attach the stage that was running. An already recorded stage is kept.
    pub fn in_stage(mut self, stage: Stage) -> Self {
        if let EqualizeError::Device { context, .. } | EqualizeError::Transfer { context, .. } =
            &mut self
        {
            context.stage.get_or_insert(stage);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            EqualizeError::invalid_input("empty").kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            EqualizeError::device(Operation::Dispatch, "lost").kind(),
            ErrorKind::Device
        );
        let build = EqualizeError::Build {
            detail: "bad".into(),
            log: "line 1".into(),
        };
        assert_eq!(build.kind(), ErrorKind::Device);
        assert_eq!(
            EqualizeError::transfer(Operation::Readback, "short").kind(),
            ErrorKind::Transfer
        );
    }

    #[test]
    fn test_in_stage_attaches_once() {
        let err = EqualizeError::device(Operation::Dispatch, "lost")
            .in_stage(Stage::RangeMapper)
            .in_stage(Stage::PixelReprojector);

        let context = err.context().unwrap();
        assert_eq!(context.stage, Some(Stage::RangeMapper));
        assert_eq!(context.operation, Operation::Dispatch);
    }

    #[test]
    fn test_display_names_stage_and_operation() {
        let err = EqualizeError::transfer(Operation::Readback, "mapping failed")
            .in_stage(Stage::BinCounter);
        assert_eq!(err.to_string(), "bin counter, readback: mapping failed");
    }

    #[test]
    fn test_build_error_carries_log() {
        let err = EqualizeError::Build {
            detail: "validation error".into(),
            log: "error: unknown identifier `foo`".into(),
        };
        assert!(err.to_string().contains("unknown identifier"));
    }
}
