// subrav-codec: canonical binary encoding and validation for SubRAV receipts.
//
// To the extent possible under law, the payment-kit contributors have
// dedicated all copyright and related and neighboring rights to this
// software to the public domain worldwide.

use amplify::IoError;

/// Errors produced while encoding or decoding the canonical SubRAV wire
/// format. Mirrors the structure of `lightning_encoding::Error`: a single
/// flat enum covering both I/O failures and format-level integrity issues.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// I/O error
    #[from(std::io::Error)]
    #[from(std::io::ErrorKind)]
    #[display(inner)]
    Io(IoError),

    /// not all provided data were consumed during the decoding process
    DataNotEntirelyConsumed,

    /// data size {0} exceeds the maximum length a length-prefixed field can
    /// encode (65535 bytes)
    TooLargeData(usize),

    /// decoded string is not valid UTF-8
    InvalidUtf8,

    /// unsupported SubRAV wire version {0}; only version 1 is currently
    /// defined
    UnsupportedVersion(u8),
}
