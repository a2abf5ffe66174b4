// payment-storage: repository traits and storage backends for payment-kit.

/// Errors shared by every storage backend.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// no record found for the given key
    NotFound,

    /// record already exists and cannot be inserted again
    AlreadyExists,

    /// claim cursor may not move backward: attempted to mark nonce {attempted} claimed, current cursor is at {current}
    NonMonotonicClaim { current: u64, attempted: u64 },

    /// underlying storage backend failed: {0}
    Backend(String),
}

impl Error {
    pub fn backend(msg: impl Into<String>) -> Self {
        Error::Backend(msg.into())
    }
}

#[cfg(feature = "sled-backend")]
impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Backend(e.to_string())
    }
}

#[cfg(feature = "sql")]
impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Backend(e.to_string())
    }
}
