//! What a command hands back to the engine

/// Pending non-local exit requested by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlFlow {
    #[default]
    None,
    /// `exit [n]`: unwind to the nearest run or subshell boundary
    Exit(i32),
}

/// Captured output and status of one command.
///
/// Output is buffered in memory; redirections decide afterwards whether it
/// goes to a file, is dropped, or flows on to the caller.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub control_flow: ControlFlow,
}

impl ExecResult {
    /// Status 0 with `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// A failed status with a diagnostic on stderr.
    pub fn err(stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Self::default()
        }
    }

    /// No output, just a status.
    pub fn status(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}
