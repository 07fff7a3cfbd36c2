use thiserror::Error;

/// Main error type for the patti slip pipeline
#[derive(Error, Debug)]
pub enum SlipError {
    #[error("Rasterization blocked by a tainted canvas: {message}")]
    RasterizationTaint { message: String },

    #[error("Could not produce image: {message}")]
    RasterizationFailure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Clipboard unsupported: {reason}")]
    ClipboardUnsupported { reason: String },

    #[error("Clipboard write denied: {reason}")]
    ClipboardDenied { reason: String },

    #[error("Every publish mechanism failed: {}", attempts.join("; "))]
    PublishFailure { attempts: Vec<String> },

    #[error("An export is already running")]
    ExportInProgress,

    #[error("Import failed: {message}")]
    Import {
        message: String,
        #[source]
        source: Option<csv::Error>,
    },

    #[error("File I/O error: {path}")]
    FileIO {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("General error: {0}")]
    General(#[from] anyhow::Error),
}

/// Remediation shown when cross-origin content poisons the capture.
pub const TAINT_ADVICE: &str = "Canvas was tainted by cross-origin resources. \
Serve images, fonts and stylesheets from the same origin or with proper CORS headers, and use HTTPS.";

impl SlipError {
    /// Create a rasterization failure without an underlying cause
    pub fn rasterization(message: impl Into<String>) -> Self {
        Self::RasterizationFailure {
            message: message.into(),
            source: None,
        }
    }

    /// Create a rasterization failure with source
    pub fn rasterization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::RasterizationFailure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a file I/O error
    pub fn file_io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::FileIO {
            path: path.into(),
            source,
        }
    }

    /// Create an import error
    pub fn import(message: impl Into<String>, source: Option<csv::Error>) -> Self {
        Self::Import {
            message: message.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Check if error is recovered locally by the next fallback tier
    pub fn is_recoverable(&self) -> bool {
        match self {
            SlipError::ClipboardUnsupported { .. } => true,
            SlipError::ClipboardDenied { .. } => true,
            SlipError::ExportInProgress => true,
            SlipError::RasterizationTaint { .. } => false,
            SlipError::RasterizationFailure { .. } => false,
            SlipError::PublishFailure { .. } => false,
            _ => true,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            SlipError::RasterizationTaint { .. } => {
                format!("❌ Copy failed: {}", TAINT_ADVICE)
            }
            SlipError::RasterizationFailure { .. } => {
                "❌ Could not produce the slip image. Please try the Export PNG action instead.".to_string()
            }
            SlipError::PublishFailure { .. } => {
                "❌ Both clipboard and download failed. Please try the Export PNG action instead.".to_string()
            }
            SlipError::ExportInProgress => {
                "⏳ Export already running, wait for it to finish.".to_string()
            }
            SlipError::Import { message, .. } => {
                format!("📄 Could not read the sheet: {}", message)
            }
            SlipError::FileIO { path, .. } => {
                format!("📁 File access error at {}. Check permissions and disk space.", path)
            }
            _ => "Something went wrong. Check the logs for details.".to_string(),
        }
    }
}

/// Result type alias for convenience
pub type SlipResult<T> = Result<T, SlipError>;

/// Error context for adding additional information
pub trait ErrorContext<T> {
    fn with_path(self, path: &std::path::Path) -> SlipResult<T>;
}

impl<T> ErrorContext<T> for Result<T, std::io::Error> {
    fn with_path(self, path: &std::path::Path) -> SlipResult<T> {
        self.map_err(|e| SlipError::file_io(path.display().to_string(), e))
    }
}
