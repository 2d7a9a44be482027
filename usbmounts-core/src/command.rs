//! Runs the external inventory tools each platform relies on.
//!
//! Every correlator talks to the operating system exclusively through a
//! [`CommandRunner`], which makes it possible to replay captured tool output
//! instead of touching real hardware.

use crate::error::QueryError;
use log::debug;
use std::process::Command;

/// Executes one external program and captures its standard output.
pub trait CommandRunner {
    /// Runs `program` with `args` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Spawn`] if the program cannot be started and
    /// [`QueryError::Status`] if it exits unsuccessfully.
    fn run(&self, program: &str, args: &[&str]) -> Result<String, QueryError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, program: &str, args: &[&str]) -> Result<String, QueryError> {
        (**self).run(program, args)
    }
}

/// Runs programs on the host with [`std::process::Command`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String, QueryError> {
        debug!("Running {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| QueryError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(QueryError::Status {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
