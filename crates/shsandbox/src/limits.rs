//! Resource limits for one sandboxed run
//!
//! [`ExecutionLimits`] is configuration; [`ExecutionCounters`] is the usage
//! the engine accumulates against it. Counters are plain integers checked
//! synchronously. The wall-clock budget is enforced through the run deadline
//! instead (see [`crate::cancel`]).

use std::time::Duration;

pub(crate) const DEFAULT_MAX_ARRAY_LENGTH: usize = 100_000;

/// Caps applied to a single run.
///
/// # Example
///
/// ```rust
/// use shsandbox::ExecutionLimits;
/// use std::time::Duration;
///
/// let limits = ExecutionLimits::new()
///     .max_commands(500)
///     .timeout(Duration::from_secs(2));
/// assert_eq!(limits.max_loop_iterations, 10_000);
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    /// Simple commands, declarations and `(( ))` commands per run
    /// (default 10,000)
    pub max_commands: usize,

    /// Iterations of any one loop; nested loops are counted separately
    /// (default 10,000)
    pub max_loop_iterations: usize,

    /// Depth of `$(...)` and `( ... )` nesting (default 32)
    pub max_nesting_depth: usize,

    /// Elements of one indexed array, counting padding before a high
    /// subscript (default 100,000)
    pub max_array_length: usize,

    /// Wall-clock budget, after which the run is cancelled (default 30s)
    pub timeout: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_commands: 10_000,
            max_loop_iterations: 10_000,
            max_nesting_depth: 32,
            max_array_length: DEFAULT_MAX_ARRAY_LENGTH,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ExecutionLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_commands(mut self, count: usize) -> Self {
        self.max_commands = count;
        self
    }

    pub fn max_loop_iterations(mut self, count: usize) -> Self {
        self.max_loop_iterations = count;
        self
    }

    pub fn max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    pub fn max_array_length(mut self, len: usize) -> Self {
        self.max_array_length = len;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Usage accumulated by one run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionCounters {
    /// Fuel spent so far
    pub commands: usize,
    /// Open substitutions and subshells
    pub nesting_depth: usize,
    /// Iterations of the innermost running loop
    pub loop_iterations: usize,
}

impl ExecutionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spend one unit of fuel.
    pub fn tick_command(&mut self, limits: &ExecutionLimits) -> Result<(), LimitExceeded> {
        self.commands += 1;
        within(self.commands, limits.max_commands, LimitExceeded::MaxCommands)
    }

    /// Count one iteration of the innermost loop.
    pub fn tick_loop(&mut self, limits: &ExecutionLimits) -> Result<(), LimitExceeded> {
        self.loop_iterations += 1;
        within(
            self.loop_iterations,
            limits.max_loop_iterations,
            LimitExceeded::MaxLoopIterations,
        )
    }

    /// Start counting a new loop. The caller saves and restores the outer
    /// loop's count around it.
    pub fn reset_loop(&mut self) {
        self.loop_iterations = 0;
    }

    /// Enter a substitution or subshell. On failure the depth is unchanged,
    /// so no matching [`pop_nesting`](Self::pop_nesting) is owed.
    pub fn push_nesting(&mut self, limits: &ExecutionLimits) -> Result<(), LimitExceeded> {
        within(
            self.nesting_depth + 1,
            limits.max_nesting_depth,
            LimitExceeded::MaxNestingDepth,
        )?;
        self.nesting_depth += 1;
        Ok(())
    }

    pub fn pop_nesting(&mut self) {
        self.nesting_depth = self.nesting_depth.saturating_sub(1);
    }
}

fn within(
    used: usize,
    max: usize,
    exceeded: fn(usize) -> LimitExceeded,
) -> Result<(), LimitExceeded> {
    if used > max { Err(exceeded(max)) } else { Ok(()) }
}

/// A counter went past its configured maximum; carries that maximum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitExceeded {
    #[error("maximum command count exceeded ({0})")]
    MaxCommands(usize),

    #[error("maximum loop iterations exceeded ({0})")]
    MaxLoopIterations(usize),

    #[error("maximum nesting depth exceeded ({0})")]
    MaxNestingDepth(usize),

    #[error("maximum array length exceeded ({0})")]
    MaxArrayLength(usize),
}
