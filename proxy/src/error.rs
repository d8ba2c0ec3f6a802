#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("proxy admin API unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("route `{0}` not found")]
    NotFound(String),
    #[error("etag precondition failed after {attempts} attempts on `{route_id}`")]
    EtagConflict { route_id: String, attempts: u32 },
    #[error("proxy admin API returned malformed route document: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
