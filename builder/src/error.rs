#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("git clone failed: {0}")]
    CloneFailed(String),
    #[error("git checkout failed: {0}")]
    CheckoutFailed(String),
    #[error("image build failed: {0}")]
    BuildFailed(String),
    #[error("filesystem error during build: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed build plan: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
