//! Command runner abstraction for invoking the agent binary.
//!
//! `CommandRunner` is the trait the agent client uses to execute commands.
//! `ProcessRunner` is the production implementation that spawns the program
//! directly (no shell). `MockRunner` is the test double that records argument
//! vectors and returns preset responses.

use std::cell::RefCell;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Why a command did not produce output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// The program could not be started at all.
    #[error("failed to execute {program}: {message}")]
    Spawn { program: String, message: String },
    /// The program ran and exited unsuccessfully; carries its stderr.
    #[error("{stderr}")]
    Exit { code: Option<i32>, stderr: String },
}

impl RunError {
    pub fn exit(stderr: &str) -> Self {
        RunError::Exit {
            code: Some(1),
            stderr: stderr.to_string(),
        }
    }
}

/// Trait for executing an argument vector; `argv[0]` is the program.
pub trait CommandRunner {
    fn run(&self, argv: &[String]) -> Result<String, RunError>;
}

/// Production runner that spawns `argv[0]` with the remaining arguments.
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, argv: &[String]) -> Result<String, RunError> {
        let (program, args) = argv.split_first().ok_or_else(|| RunError::Spawn {
            program: String::new(),
            message: "empty command".into(),
        })?;
        debug!(command = %argv.join(" "), "running agent command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| RunError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(RunError::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }
}

/// Test-double runner that records commands and returns pre-configured responses.
pub struct MockRunner {
    responses: RefCell<Vec<Result<String, RunError>>>,
    commands: RefCell<Vec<String>>,
}

impl MockRunner {
    pub fn with_responses(responses: Vec<Result<String, RunError>>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        MockRunner {
            responses: RefCell::new(reversed),
            commands: RefCell::new(Vec::new()),
        }
    }

    pub fn new() -> Self {
        MockRunner {
            responses: RefCell::new(Vec::new()),
            commands: RefCell::new(Vec::new()),
        }
    }

    /// Every command run so far, each argument vector joined by spaces.
    pub fn executed_commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, argv: &[String]) -> Result<String, RunError> {
        self.commands.borrow_mut().push(argv.join(" "));
        let mut responses = self.responses.borrow_mut();
        if let Some(response) = responses.pop() {
            response
        } else {
            Ok(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn mock_runner_records_commands() {
        let runner = MockRunner::with_responses(vec![Ok("ok".into()), Ok("ok2".into())]);
        assert!(runner.run(&argv(&["velociraptor", "user", "show", "a"])).is_ok());
        assert!(runner.run(&argv(&["velociraptor", "acl", "show", "a"])).is_ok());
        let cmds = runner.executed_commands();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0], "velociraptor user show a");
        assert_eq!(cmds[1], "velociraptor acl show a");
    }

    #[test]
    fn mock_runner_returns_responses_in_order() {
        let runner = MockRunner::with_responses(vec![
            Ok("first".into()),
            Err(RunError::exit("fail")),
            Ok("third".into()),
        ]);
        assert_eq!(runner.run(&argv(&["a"])).unwrap(), "first");
        assert_eq!(runner.run(&argv(&["b"])).unwrap_err(), RunError::exit("fail"));
        assert_eq!(runner.run(&argv(&["c"])).unwrap(), "third");
    }

    #[test]
    fn mock_runner_defaults_to_empty_ok() {
        let runner = MockRunner::new();
        assert_eq!(runner.run(&argv(&["anything"])).unwrap(), "");
    }

    #[test]
    fn process_runner_rejects_empty_argv() {
        let err = ProcessRunner.run(&[]).unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }

    #[test]
    fn process_runner_reports_missing_program() {
        let err = ProcessRunner
            .run(&argv(&["/nonexistent/veloconf-test-binary"]))
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }
}
