use crate::error::{Result, TutorError};

/// Result of one pipeline stage.
///
/// Stages that only improve an answer report `Fallback` and the caller picks
/// the documented substitute; the stage that produces the answer reports
/// `Fatal`.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Ok(T),
    Fallback(String),
    Fatal(TutorError),
}

impl<T> StageOutcome<T> {
    /// Map an adapter result onto a degradable stage
    pub fn degrade(res: Result<T>) -> Self {
        match res {
            Ok(v) => Self::Ok(v),
            Err(e) => Self::Fallback(e.to_string()),
        }
    }

    /// Map an adapter result onto a stage whose failure ends the request
    pub fn fatal(res: Result<T>) -> Self {
        match res {
            Ok(v) => Self::Ok(v),
            Err(e) => Self::Fatal(e),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Resolve a fallback with `substitute`; fatal errors still propagate
    pub fn or_fallback(self, stage: &str, substitute: impl FnOnce() -> T) -> Result<T> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Fallback(reason) => {
                tracing::warn!("{} degraded: {}", stage, reason);
                Ok(substitute())
            }
            Self::Fatal(e) => Err(e),
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Fallback(reason) => Err(TutorError::Internal(reason)),
            Self::Fatal(e) => Err(e),
        }
    }
}
