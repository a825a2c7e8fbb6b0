//! Error types shared by every pathlink crate.

/// Failures raised by namespace operations, codecs, channels, and transports.
///
/// The variants follow the protocol's failure taxonomy: resolution misses,
/// missing capabilities, bad wire input, protocol violations (programmer
/// errors, which should surface loudly), and transport-level failures.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The path resolved to nothing.
    #[error("path not found: {path}")]
    NotFound { path: String },

    /// The entry exists but does not support the requested operation.
    #[error("entry{} does not support {op}", at_path(.path))]
    NotSupported {
        op: &'static str,
        path: Option<String>,
    },

    /// A wire literal or request was missing required pieces.
    #[error("malformed input: {message}")]
    Malformed { message: String },

    /// An internal contract was broken - packet after a channel terminal,
    /// ascending an enumeration above its root, and the like.
    #[error("protocol violation: {message}")]
    Protocol { message: String },

    /// The underlying connection failed or was torn down.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// The far side answered `Ok: false`.
    #[error("\"{op}\" operation wasn't ok: {message}")]
    Rejected { op: String, message: String },

    /// Generic error with message.
    #[error("{message}")]
    Other { message: String },
}

fn at_path(path: &Option<String>) -> String {
    match path {
        Some(p) => format!(" at {}", p),
        None => String::new(),
    }
}

impl Error {
    /// Shorthand for an unsupported-capability failure without path context.
    pub fn not_supported(op: &'static str) -> Self {
        Error::NotSupported { op, path: None }
    }

    /// Attach path context to an unsupported-capability failure.
    pub fn not_supported_at(op: &'static str, path: impl Into<String>) -> Self {
        Error::NotSupported {
            op,
            path: Some(path.into()),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound { path: path.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Error::Malformed {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Error::Other {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Malformed {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_supported_display() {
        let e = Error::not_supported("get");
        assert_eq!(format!("{}", e), "entry does not support get");

        let e = Error::not_supported_at("put", "/data/x");
        assert_eq!(format!("{}", e), "entry at /data/x does not support put");
    }

    #[test]
    fn rejected_display() {
        let e = Error::Rejected {
            op: "invoke".to_string(),
            message: "boom".to_string(),
        };
        assert!(format!("{}", e).contains("invoke"));
        assert!(format!("{}", e).contains("boom"));
    }

    #[test]
    fn io_error_converts_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let e: Error = io.into();
        assert!(matches!(e, Error::Transport { .. }));
    }

    #[test]
    fn json_error_converts_to_malformed() {
        let bad = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let e: Error = bad.into();
        assert!(matches!(e, Error::Malformed { .. }));
    }
}
