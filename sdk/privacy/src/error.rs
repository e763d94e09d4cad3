use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrivacyError {
    #[error("invalid length for {what}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Wrong key, tampered envelope or corrupted padding. Never a partial value.
    #[error("decryption failed")]
    Decryption,

    #[error("memo too long: {len} bytes (max {max})")]
    MemoTooLong { len: usize, max: usize },

    #[error("encryption failed")]
    Encryption,
}

impl PrivacyError {
    pub(crate) fn length(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::InvalidLength {
            what,
            expected,
            actual,
        }
    }
}
