/// Failures surfaced by the gradebook core.
///
/// The first three variants are the domain taxonomy; the rest wrap
/// collaborator failures so callers can still map them to a wire code.
#[derive(thiserror::Error, Debug)]
pub enum GradebookError {
    /// Unknown class, unknown or expired import session, CPF not enrolled.
    #[error("{0}")]
    NotFound(String),
    /// Unrecognised grade token, unsupported file type, malformed mapping.
    #[error("{0}")]
    Validation(String),
    /// A known variant whose processing does not exist.
    #[error("{0}")]
    Unimplemented(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl GradebookError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "bad_request",
            Self::Unimplemented(_) => "not_implemented",
            Self::Io(_) => "io_failed",
            Self::Csv(_) | Self::Zip(_) => "parse_failed",
            Self::Db(_) => "db_failed",
        }
    }

    /// HTTP-style status for clients that still think in those terms.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) | Self::Csv(_) | Self::Zip(_) => 400,
            Self::Unimplemented(_) => 501,
            Self::Io(_) | Self::Db(_) => 500,
        }
    }
}

pub type GradebookResult<T> = Result<T, GradebookError>;
