use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("Connection to {resource} failed: {reason}")]
    Connection { resource: String, reason: String },
    #[error("Communication error ({context}): {source}")]
    Communication {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("Instrument timed out: {0}")]
    Timeout(String),
    #[error("Parse error: {0}")]
    Parse(String),
    /// Saved files or sample data that cannot be used; never an instrument fault
    #[error("Bad data: {0}")]
    Data(String),
    #[error("File error at {}: {source}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Hook error: {0}")]
    Hook(String),
}

impl ScopeError {
    pub fn connection(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        ScopeError::Connection {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Map an I/O error raised while talking to the instrument.
    ///
    /// Timeouts are split out so callers can tell a silent instrument from a broken pipe.
    pub fn communication(source: std::io::Error, context: impl Into<String>) -> Self {
        let context = context.into();
        match source.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                ScopeError::Timeout(context)
            }
            _ => ScopeError::Communication { source, context },
        }
    }

    pub fn file(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ScopeError::Io {
            source,
            path: path.into(),
        }
    }

    /// True for errors that mean the instrument session can no longer be trusted.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            ScopeError::Connection { .. }
                | ScopeError::Communication { .. }
                | ScopeError::Timeout(_)
                | ScopeError::Parse(_)
        )
    }
}

impl From<csv::Error> for ScopeError {
    fn from(e: csv::Error) -> Self {
        ScopeError::Data(format!("CSV: {e}"))
    }
}

impl From<serde_json::Error> for ScopeError {
    fn from(e: serde_json::Error) -> Self {
        ScopeError::Data(format!("JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_timeout_is_split_from_communication() {
        let e = ScopeError::communication(Error::new(ErrorKind::TimedOut, "slow"), "reading reply");
        assert!(matches!(e, ScopeError::Timeout(_)));
        assert!(e.is_link_failure());

        let e = ScopeError::communication(Error::new(ErrorKind::BrokenPipe, "gone"), "writing");
        assert!(matches!(e, ScopeError::Communication { .. }));
    }

    #[test]
    fn test_user_errors_are_not_link_failures() {
        assert!(!ScopeError::Validation("abc".into()).is_link_failure());
        assert!(!ScopeError::file(Error::new(ErrorKind::PermissionDenied, "ro"), "/x.csv").is_link_failure());
        assert!(ScopeError::connection("USB0::1::2::3::INSTR", "offline").is_link_failure());
    }

    #[test]
    fn test_file_content_errors_are_not_link_failures() {
        assert!(!ScopeError::Data("row 2: column 2 is not a number".into()).is_link_failure());
        assert!(!ScopeError::Hook("F2 (custom): failed".into()).is_link_failure());
        assert!(ScopeError::Parse("reply to 'TDIV?' is not UTF-8".into()).is_link_failure());

        let csv_err = csv::ReaderBuilder::new()
            .from_reader("a,b\n1,2,3\n".as_bytes())
            .records()
            .find_map(Result::err)
            .unwrap();
        assert!(matches!(ScopeError::from(csv_err), ScopeError::Data(_)));
    }
}
