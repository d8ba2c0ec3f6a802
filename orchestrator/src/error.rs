use zane_common::{Error as CommonError, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Common(#[from] CommonError),
    #[error("container driver error: {0}")]
    Docker(#[from] zane_docker::Error),
    #[error("proxy configurator error: {0}")]
    Proxy(#[from] zane_proxy::Error),
    #[error("build pipeline error: {0}")]
    Build(#[from] zane_builder::Error),
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Common(err) => err.kind(),
            Error::Docker(err) if err.is_not_found() => ErrorKind::NotFound,
            Error::Docker(_) => ErrorKind::Fatal,
            Error::Proxy(zane_proxy::Error::EtagConflict { .. }) => ErrorKind::EtagConflict,
            Error::Proxy(_) => ErrorKind::Fatal,
            Error::Build(zane_builder::Error::CloneFailed(_)) => ErrorKind::CloneFailed,
            Error::Build(zane_builder::Error::CheckoutFailed(_)) => ErrorKind::CheckoutFailed,
            Error::Build(_) => ErrorKind::BuildFailed,
            Error::Persistence(_) => ErrorKind::Internal,
        }
    }

    pub fn reason(&self) -> String {
        self.to_string()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
