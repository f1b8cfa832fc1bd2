/// Result of a unit of pipeline work.
///
/// `Skipped` covers expected absence (no work, tool not installed, missing
/// credentials) and is never counted as a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Succeeded(T),
    Skipped(String),
    Failed(String),
}

impl<T> Outcome<T> {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed(error.into())
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Succeeded(value) => Outcome::Succeeded(f(value)),
            Self::Skipped(reason) => Outcome::Skipped(reason),
            Self::Failed(error) => Outcome::Failed(error),
        }
    }

    /// The skip reason or failure message, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Succeeded(_) => None,
            Self::Skipped(reason) => Some(reason),
            Self::Failed(error) => Some(error),
        }
    }
}
