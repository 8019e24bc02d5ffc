/// Result alias that carries the custom [`HubError`] type.
pub type Result<T> = std::result::Result<T, HubError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Free-form failure that does not fit one of the more specific variants.
    #[error("{0}")]
    Message(String),
    /// Configuration rejected during validation.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A source backend call failed. Callers inside the hub treat this as
    /// transient and never escalate it.
    #[error("source `{source_name}` failed: {message}")]
    Source { source_name: String, message: String },
    /// The display sink refused a frame, a backlight level or a lifecycle call.
    #[error("display error: {0}")]
    Display(String),
    /// A lock shared between the render loop and another thread was poisoned.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    /// Shutdown was forced before the outro could complete.
    #[error("shutdown interrupted")]
    Interrupted,
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Image decoding or encoding failed.
    #[error("{0}")]
    Image(#[from] image::ImageError),
    /// JSON (de)serialisation failed.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl HubError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Creates a source failure tagged with the source's name.
    pub fn backend<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        Self::Source {
            source_name: name.into(),
            message: message.into(),
        }
    }
}

impl From<&str> for HubError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for HubError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
