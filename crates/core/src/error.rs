/// Result alias that carries the custom [`AlbumAudioError`] type.
pub type Result<T> = std::result::Result<T, AlbumAudioError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum AlbumAudioError {
    /// Free-form failure that does not warrant a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// A caller handed the crate data it cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The audio output could not be started. Fatal to the attempted
    /// interaction; the next user gesture may retry.
    #[error("audio output failed to start: {0}")]
    Init(String),
    #[error("failed to load sample `{path}`: {reason}")]
    SampleLoad { path: String, reason: String },
    #[error("resampling failed: {0}")]
    Resample(String),
    #[error("export server is not running or unreachable ({0})")]
    ServerUnavailable(String),
    /// Error text reported by the encoding service, surfaced verbatim.
    #[error("{0}")]
    Encoding(String),
    /// The encoder accepted the job but the connection broke mid-response.
    #[error("http error: {0}")]
    Http(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("fft error: {0}")]
    Fft(#[from] realfft::FftError),
}

impl AlbumAudioError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// True for failures that mean the export backend could not be reached at all.
    pub fn is_server_unavailable(&self) -> bool {
        matches!(self, Self::ServerUnavailable(_))
    }
}

impl From<&str> for AlbumAudioError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for AlbumAudioError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
