use bollard::errors::Error as BollardError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("docker daemon error: {0}")]
    Daemon(#[from] BollardError),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("container state object is malformed at attribute: {0}")]
    Malformed(&'static str),
    #[error("image pull failed: {0}")]
    ImagePull(String),
    #[error("exec failed: {0}")]
    Exec(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Daemon(BollardError::DockerResponseServerError { status_code: 404, .. })
        )
    }
}

/// Pulls a possibly-absent field out of a bollard inspect response, turning a
/// `None` into a [`Error::Malformed`] rather than panicking.
#[macro_export]
macro_rules! safe_unwrap {
    ($fst:ident$(.$attr:ident$(($ex:expr))?)+) => {
        $fst$(.$attr$(($ex))?)+
            .as_ref()
            .ok_or_else(|| $crate::error::Error::Malformed(concat!($(stringify!($attr), ".")+)))?
    };
}

pub type Result<T> = std::result::Result<T, Error>;
