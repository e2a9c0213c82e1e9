use thiserror::Error;

/// Failure taxonomy for checker invocations.
///
/// A checker never records a DOWN verdict itself; every non-success
/// outcome is raised as one of these variants and the caller decides
/// between retrying and recording a terminal DOWN heartbeat.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckError {
    /// The external tool could not be run or exited abnormally.
    #[error("check execution failed: {0}")]
    ExecutionFailure(String),

    /// The tool ran but wrote diagnostics to its error stream.
    #[error("unexpected stderr output: {0}")]
    UnexpectedStderr(String),

    /// No decisive output before the deadline.
    #[error("check timed out: {0}")]
    Timeout(String),

    /// Target does not exist in the mesh or is blocked by access policy.
    #[error("no matching peer: {0}")]
    PeerUnreachable(String),

    /// The tool cannot usefully probe its own host.
    #[error("target resolves to the local host: {0}")]
    SelfTargetInvalid(String),

    /// A line of output no classifier rule recognized.
    #[error("unrecognized checker output: {0}")]
    UnexpectedOutput(String),
}
