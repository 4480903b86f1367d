//! Mock CommandRunner for unit testing
//!
//! Records every invocation and answers from canned responses keyed by program
//! name. Programs without a canned response succeed with empty output.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::command::{CommandOutput, CommandRunner};
use crate::error::HostError;

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Started with `spawn` rather than `run`
    pub detached: bool,
}

impl RecordedCommand {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockCommandRunner {
    calls: Arc<Mutex<Vec<RecordedCommand>>>,
    responses: Arc<Mutex<HashMap<String, CommandOutput>>>,
    spawn_failures: Arc<Mutex<HashMap<String, String>>>,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every `run` of `program` with `output`
    pub fn respond(&self, program: &str, output: CommandOutput) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(program.to_string(), output);
        }
    }

    /// Answer every `run` of `program` with an exit code and stdout
    pub fn respond_with(&self, program: &str, status: i32, stdout: &str) {
        self.respond(
            program,
            CommandOutput {
                status,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    /// Make `spawn` of `program` fail
    pub fn fail_spawn(&self, program: &str, message: &str) {
        if let Ok(mut failures) = self.spawn_failures.lock() {
            failures.insert(program.to_string(), message.to_string());
        }
    }

    pub fn calls(&self) -> Vec<RecordedCommand> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Command lines of every invocation, in order
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(RecordedCommand::command_line).collect()
    }

    pub fn calls_to(&self, program: &str) -> Vec<RecordedCommand> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn record(&self, program: &str, args: &[String], detached: bool) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCommand {
                program: program.to_string(),
                args: args.to_vec(),
                detached,
            });
        }
    }
}

#[async_trait::async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError> {
        self.record(program, args, false);
        let response = self
            .responses
            .lock()
            .ok()
            .and_then(|responses| responses.get(program).cloned());
        Ok(response.unwrap_or_default())
    }

    async fn spawn(&self, program: &str, args: &[String]) -> Result<(), HostError> {
        self.record(program, args, true);
        let failure = self
            .spawn_failures
            .lock()
            .ok()
            .and_then(|failures| failures.get(program).cloned());
        match failure {
            Some(message) => Err(HostError::Spawn {
                command: program.to_string(),
                source: std::io::Error::other(message),
            }),
            None => Ok(()),
        }
    }
}
