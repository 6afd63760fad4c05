//! Flow control builtins (:, true, false, exit)

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::{ControlFlow, ExecResult};

/// The `:` builtin - does nothing, successfully.
pub struct Colon;

#[async_trait]
impl Builtin for Colon {
    async fn execute(&self, _ctx: Context<'_>) -> Result<ExecResult> {
        Ok(ExecResult::status(0))
    }
}

/// The true builtin - always returns 0.
pub struct True;

#[async_trait]
impl Builtin for True {
    async fn execute(&self, _ctx: Context<'_>) -> Result<ExecResult> {
        Ok(ExecResult::status(0))
    }
}

/// The false builtin - always returns 1.
pub struct False;

#[async_trait]
impl Builtin for False {
    async fn execute(&self, _ctx: Context<'_>) -> Result<ExecResult> {
        Ok(ExecResult::status(1))
    }
}

/// The exit builtin - stop the run with a status code.
///
/// Without an argument the status of the last command is kept.
pub struct Exit;

#[async_trait]
impl Builtin for Exit {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let exit_code = match ctx.args.first() {
            Some(arg) => match arg.parse::<i64>() {
                Ok(n) => (n & 0xff) as i32,
                Err(_) => {
                    let mut result =
                        ExecResult::err(format!("exit: {}: numeric argument required\n", arg), 2);
                    result.control_flow = ControlFlow::Exit(2);
                    return Ok(result);
                }
            },
            None => ctx.env.last_status(),
        };

        Ok(ExecResult {
            exit_code,
            control_flow: ControlFlow::Exit(exit_code),
            ..ExecResult::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::testing::Harness;
    use crate::policy::Policy;

    #[tokio::test]
    async fn test_true_false_colon() {
        let mut h = Harness::new(Policy::new());
        assert_eq!(h.run(&True, &[]).await.unwrap().exit_code, 0);
        assert_eq!(h.run(&False, &[]).await.unwrap().exit_code, 1);
        assert_eq!(h.run(&Colon, &["ignored"]).await.unwrap().exit_code, 0);
    }

    #[tokio::test]
    async fn test_exit_status() {
        let mut h = Harness::new(Policy::new());
        let result = h.run(&Exit, &["3"]).await.unwrap();
        assert_eq!(result.control_flow, ControlFlow::Exit(3));

        let result = h.run(&Exit, &["256"]).await.unwrap();
        assert_eq!(result.exit_code, 0);

        h.env.set_last_status(7);
        let result = h.run(&Exit, &[]).await.unwrap();
        assert_eq!(result.control_flow, ControlFlow::Exit(7));

        let result = h.run(&Exit, &["abc"]).await.unwrap();
        assert_eq!(result.control_flow, ControlFlow::Exit(2));
    }
}
