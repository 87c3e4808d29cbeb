//! F2F CLI - command-line front end for face-to-face device authentication
//!
//! This crate provides:
//! - Liveness probes against an auth backend
//! - Envelope decoding for debugging taps
//! - Inspection and reset of local device/profile records
//! - An interactive line-based tap session driving the protocol engine

pub mod cli;
pub mod config;
pub mod output;
pub mod runtime;
pub mod tap;

pub use cli::Cli;
pub use config::{CliOverrides, Config};
pub use output::{JsonResponse, OutputFormat, OutputFormatter};

use f2f_core::ProtocolError;

/// Process exit codes:
/// - 0: success
/// - 1: general error
/// - 2: authentication failed
/// - 4: connection failed
/// - 5: invalid input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    AuthenticationFailed = 2,
    ConnectionFailed = 4,
    InvalidInput = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::AuthenticationFailed => "AUTH_FAILED",
            ExitCode::ConnectionFailed => "CONNECTION_FAILED",
            ExitCode::InvalidInput => "INVALID_INPUT",
        }
    }

    /// Exit code for a failed protocol step.
    pub fn for_error(error: &ProtocolError) -> Self {
        match error {
            ProtocolError::Transport(_) | ProtocolError::EmptyResponse => {
                ExitCode::ConnectionFailed
            }
            ProtocolError::Decode(_)
            | ProtocolError::Encode(_)
            | ProtocolError::InvalidEndpoint(_) => ExitCode::InvalidInput,
            e if e.is_auth_failure() => ExitCode::AuthenticationFailed,
            _ => ExitCode::GeneralError,
        }
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;
    use f2f_core::remote::TransportError;
    use f2f_core::DecodeError;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(i32::from(ExitCode::Success), 0);
        assert_eq!(i32::from(ExitCode::GeneralError), 1);
        assert_eq!(i32::from(ExitCode::AuthenticationFailed), 2);
        assert_eq!(i32::from(ExitCode::ConnectionFailed), 4);
        assert_eq!(i32::from(ExitCode::InvalidInput), 5);
    }

    #[test]
    fn test_exit_code_for_error() {
        assert_eq!(
            ExitCode::for_error(&ProtocolError::Transport(TransportError::Connect(
                "refused".into()
            ))),
            ExitCode::ConnectionFailed
        );
        assert_eq!(
            ExitCode::for_error(&ProtocolError::Decode(DecodeError::Empty)),
            ExitCode::InvalidInput
        );
        assert_eq!(
            ExitCode::for_error(&ProtocolError::Server {
                status: 403,
                message: "Forbidden".into()
            }),
            ExitCode::AuthenticationFailed
        );
        assert_eq!(
            ExitCode::for_error(&ProtocolError::InvalidState("busy".into())),
            ExitCode::GeneralError
        );
        assert_eq!(ExitCode::InvalidInput.name(), "INVALID_INPUT");
    }
}
