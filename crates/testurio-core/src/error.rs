//! Error types for the testurio core runtime.

/// Result type alias used throughout `testurio-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy (spec §7).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `start`/`stop` called from an illegal component lifecycle state.
    #[error("lifecycle error: {message}")]
    Lifecycle {
        /// Description of the illegal transition.
        message: String,
    },

    /// A protocol adapter failed to send, receive, or connect.
    #[error("transport error: {message}")]
    Transport {
        /// Adapter-provided description.
        message: String,
    },

    /// An `assert` handler rejected a message.
    #[error("assertion failed: {message}")]
    Assertion {
        /// Human-readable assertion failure.
        message: String,
    },

    /// A pending cell was not resolved before its deadline.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A `wait*` step found its hook already resolved.
    #[error("strict ordering violation: result arrived before wait* started")]
    StrictOrderingViolation,

    /// Sync client `onResponse`/`waitResponse` with no prior `request`.
    #[error("no matching request for response step: {message}")]
    NoMatchingRequest {
        /// Context describing which step/messageType had no match.
        message: String,
    },

    /// `onResponse` registered against a mock-mode server.
    #[error("onResponse handlers are not valid on a mock-mode server: {message}")]
    ProxyModeError {
        /// Offending component/step description.
        message: String,
    },

    /// The run was cancelled via the outer cancellation signal.
    #[error("cancelled")]
    Cancelled,

    /// The owning component was stopped while a pending cell was outstanding.
    #[error("component '{component}' was stopped")]
    ComponentStopped {
        /// Name of the component that stopped.
        component: String,
    },

    /// No component with this name is registered in the scenario.
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    /// No connection is bound to the given link id.
    #[error("unknown link: {0}")]
    UnknownLink(String),

    /// JSON encode/decode failure in the reference codec.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for conditions that don't warrant their own variant.
    #[error("{0}")]
    Generic(String),
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::Generic(message)
    }
}

impl Error {
    /// Build a [`Error::Lifecycle`].
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle { message: message.into() }
    }

    /// Build a [`Error::Transport`].
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Build a [`Error::Assertion`].
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion { message: message.into() }
    }

    /// Build a [`Error::NoMatchingRequest`].
    pub fn no_matching_request(message: impl Into<String>) -> Self {
        Self::NoMatchingRequest { message: message.into() }
    }

    /// Build a [`Error::ProxyModeError`].
    pub fn proxy_mode(message: impl Into<String>) -> Self {
        Self::ProxyModeError { message: message.into() }
    }

    /// Build a [`Error::Generic`].
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic(message.into())
    }
}
