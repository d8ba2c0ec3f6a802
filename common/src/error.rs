use std::fmt;

use serde::{Serialize, Serializer};
use strum::{Display, EnumString};

/// Canonical reason strings surfaced on a [`crate::Deployment`]'s `status_reason`,
/// and the vocabulary every crate in the workspace maps its own errors onto at
/// the boundary where they become user- or operator-visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidChange,
    Conflict,
    NotFound,
    CloneFailed,
    CheckoutFailed,
    BuildFailed,
    ImagePullFailed,
    HealthcheckUnhealthy,
    EtagConflict,
    Cancelled,
    /// A non-retryable programming error, e.g. cancelling a finished deployment.
    Fatal,
    Internal,
}

/// A boxed, classified error carried across crate boundaries.
///
/// Every [`Error`] has an [`ErrorKind`] and an optional source.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    pub fn custom<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: Some(message.into()),
            source: None,
        }
    }

    pub fn source<E>(kind: ErrorKind, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            message: None,
            source: Some(Box::new(err)),
        }
    }

    pub fn fatal<S: Into<String>>(message: S) -> Self {
        Self::custom(ErrorKind::Fatal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The text that belongs on `Deployment.status_reason`.
    pub fn reason(&self) -> String {
        match (&self.message, &self.source) {
            (Some(msg), _) => msg.clone(),
            (None, Some(src)) => src.to_string(),
            (None, None) => self.kind.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        } else if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("kind", &self.kind)?;
        map.serialize_entry("reason", &self.reason())?;
        map.end()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_prefers_explicit_message() {
        let err = Error::custom(ErrorKind::InvalidChange, "duplicate env var key");
        assert_eq!(err.reason(), "duplicate env var key");
    }

    #[test]
    fn reason_falls_back_to_kind() {
        let err = Error::new(ErrorKind::NotFound);
        assert_eq!(err.reason(), "not_found");
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::custom(ErrorKind::Conflict, "port 6379 already used");
        assert_eq!(err.to_string(), "conflict: port 6379 already used");
    }
}
