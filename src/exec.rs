use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::Serialize;
use tracing::debug;

use crate::host::{Host, ScriptOutput};
use crate::queue::panic_message;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutcome {
    pub fn timed_out() -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: "timed out waiting for the host thread".to_string(),
        }
    }
}

/// Runs `code` on the host with fully captured output. Never fails: script
/// errors and panics are rendered into `stderr` with `success = false`.
/// Viewports are refreshed afterwards whatever the outcome.
pub fn execute<H: Host>(host: &mut H, code: &str) -> ExecOutcome {
    let mut output = ScriptOutput::default();
    let result = catch_unwind(AssertUnwindSafe(|| host.run_script(code, &mut output)));
    let success = match result {
        Ok(Ok(())) => true,
        Ok(Err(message)) => {
            output.eprintln(&format!("Error: {message}"));
            false
        }
        Err(payload) => {
            output.eprintln(&format!("Error: script aborted: {}", panic_message(payload.as_ref())));
            false
        }
    };

    if let Err(err) = host.redraw_viewports() {
        debug!("viewport redraw after execute failed: {err}");
    }

    ExecOutcome {
        success,
        stdout: output.stdout,
        stderr: output.stderr,
    }
}
