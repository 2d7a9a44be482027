/// A failure to query the host's device inventory.
///
/// These are the only errors a listing ever surfaces. Irregular data inside an
/// otherwise successful query is absorbed by the correlators instead.
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("Unable to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    Status {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Malformed output from `{program}`: {reason}")]
    Malformed { program: String, reason: String },
}

impl QueryError {
    /// The program whose invocation failed.
    pub fn program(&self) -> &str {
        match self {
            QueryError::Spawn { program, .. }
            | QueryError::Status { program, .. }
            | QueryError::Malformed { program, .. } => program,
        }
    }
}
