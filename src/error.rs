use thiserror::Error;

#[derive(Error, Debug)]
pub enum StegoError {
    #[error("Payload too large: need {required} bits, carrier holds {available}")]
    CapacityExceeded { required: u64, available: u64 },

    #[error("Unsupported carrier format: {0}")]
    UnsupportedCarrierFormat(String),

    #[error("Decryption failed (wrong password or tampered header)")]
    CryptoFailure,

    #[error("File operation error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("LSB depth must be within 1..=8, got {0}")]
    InvalidDepth(u8),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, StegoError>;
