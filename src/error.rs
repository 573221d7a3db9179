use thiserror::Error;

use crate::status::StatusMask;
use crate::waitset::ConditionId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
    #[error("condition {0} already registered with this waitset")]
    AlreadyRegistered(ConditionId),
    #[error("condition {0} is attached to another waitset")]
    ConditionInUse(ConditionId),
    #[error("status kinds {0:?} would be delivered to both the listener and a condition")]
    DoubleDelivery(StatusMask),
    #[error("listener callback failed on the notification thread")]
    ListenerFailed,
    #[error("precondition not met: {0}")]
    PreconditionNotMet(&'static str),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("condition action failed: {0}")]
    Action(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Wraps a caller failure raised inside a condition action. The failure
    /// stays reachable through `source()`.
    pub fn action(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Error::Action(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn test_action_keeps_source_chain() {
        let err = Error::action(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        assert_eq!(err.to_string(), "condition action failed: sink closed");
        let source = err.source().expect("action error has a source");
        let io_err = source.downcast_ref::<io::Error>().expect("source is the io error");
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
    }
}

pub type Result<T> = std::result::Result<T, Error>;
