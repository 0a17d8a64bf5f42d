//! Error types for vayu-wire

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Codec error types
///
/// Everything except [`Error::Io`] describes a single bad frame or a bad
/// message description. I/O errors mean the underlying stream failed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (includes short reads, surfaced as `UnexpectedEof`)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// First byte of a frame was neither 0xFE nor 0xFD
    #[error("invalid magic byte: {0:#04x}")]
    InvalidMagic(u8),

    /// v2 incompatibility flag carried bits this codec does not understand
    #[error("unknown incompatibility flag: {0:#04x}")]
    UnknownIncompatibilityFlag(u8),

    /// v1 payload length does not match the message layout
    #[error("payload length mismatch for message {id}: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Message id
        id: u32,
        /// Expected payload length
        expected: usize,
        /// Actual payload length
        actual: usize,
    },

    /// Frame checksum mismatch
    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum computed locally
        expected: u16,
        /// Checksum carried by the frame
        actual: u16,
    },

    /// Inbound key configured but the frame is not signed
    #[error("signature required")]
    SignatureRequired,

    /// Signature does not match the recomputed one
    #[error("signature mismatch")]
    SignatureMismatch,

    /// Signature timestamp older than the replay window allows
    #[error("signature timestamp too old: {timestamp} < {minimum}")]
    SignatureTimestampTooOld {
        /// Timestamp carried by the frame
        timestamp: u64,
        /// Minimum accepted timestamp
        minimum: u64,
    },

    /// Message id is not part of the dialect
    #[error("unknown message id: {0}")]
    UnknownMessageId(u32),

    /// Writer has no dialect to encode or checksum a message
    #[error("no dialect loaded to write message id {0}")]
    DialectMissing(u32),

    /// Payload could not be decoded into a typed message
    #[error("message decode error: {0}")]
    MessageDecode(String),

    /// Message could not be encoded into a payload
    #[error("message encode error: {0}")]
    MessageEncode(String),

    /// Message id does not fit in a v1 frame
    #[error("message id {0} does not fit in a MAVLink v1 frame")]
    V1IdOverflow(u32),

    /// Two messages in one dialect share an id
    #[error("duplicate message id: {0}")]
    DuplicateMessageId(u32),

    /// Message type name lacks the reserved prefix
    #[error("message name '{0}' does not start with 'Message'")]
    MissingMessagePrefix(&'static str),

    /// Field type cannot be represented on the wire
    #[error("unsupported type for field '{field}': {reason}")]
    UnsupportedFieldType {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },

    /// String field declared without a capacity
    #[error("string field '{0}' has no capacity")]
    MissingStringCapacity(&'static str),

    /// Enum field declared with an invalid carrier or wire width
    #[error("invalid enum declaration for field '{field}': {reason}")]
    InvalidEnum {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },

    /// Array length outside 1..=255
    #[error("invalid array length {len} for field '{field}'")]
    InvalidArrayLength {
        /// Field name
        field: &'static str,
        /// Declared length
        len: usize,
    },
}

impl Error {
    /// Whether the error means the underlying stream is unusable
    ///
    /// Non-fatal errors concern a single frame; a reader can keep going.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}
