//! Common code shared between `emotion_server` and `emotion_client`.
pub mod protocol;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
