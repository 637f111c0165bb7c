//! Error types and the error-notification collaborator.

use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// CreationDiagnostics
// ---------------------------------------------------------------------------

/// Diagnostic payload gathered when member creation fails.
///
/// Carried by [`Error::CreationFailed`] and handed to the [`ErrorSink`] so
/// out-of-band alerting can see the pool's shape at the moment of failure.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CreationDiagnostics {
    /// The pool identifier (used only for logs and alerts).
    pub pool: String,
    /// Total live members (available + in use) at the time of failure.
    pub resource_count: usize,
    /// Members sitting in the available queue.
    pub available_count: usize,
    /// Members checked out to callers.
    pub usage_count: usize,
    /// Available physical memory in bytes, if the platform exposes it.
    pub available_memory_bytes: Option<u64>,
}

impl std::fmt::Display for CreationDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pool '{}': {} live, {} available, {} in use",
            self.pool, self.resource_count, self.available_count, self.usage_count
        )
    }
}

/// Available physical memory in bytes, if the platform exposes it.
#[cfg(unix)]
#[allow(unsafe_code)]
pub(crate) fn available_memory_bytes() -> Option<u64> {
    // SAFETY: sysconf reads process-global configuration and has no
    // memory-safety preconditions.
    let pages = unsafe { libc::sysconf(libc::_SC_AVPHYS_PAGES) };
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    (pages > 0 && page_size > 0).then(|| pages as u64 * page_size as u64)
}

#[cfg(not(unix))]
pub(crate) fn available_memory_bytes() -> Option<u64> {
    None
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for pool and size-manager operations
#[derive(Error, Debug)]
pub enum Error {
    /// Operation attempted after the pool was disposed
    #[error("pool '{pool}' is disposed")]
    Disposed {
        /// The pool identifier
        pool: String,
    },

    /// The factory returned no usable instance
    #[error("member creation failed ({diagnostics})")]
    CreationFailed {
        /// Pool shape at the moment of failure
        diagnostics: CreationDiagnostics,
    },

    /// Acquire exhausted its retry budget without obtaining a member
    #[error("acquire gave up on pool '{pool}' after {attempts} attempts")]
    MaxRetriesReached {
        /// The pool identifier
        pool: String,
        /// Number of attempts made before giving up
        attempts: u32,
        /// The last creation failure, if one caused the give-up
        #[source]
        source: Option<Box<Error>>,
    },

    /// A size manager was asked to manage a second pool
    #[error("size manager is already attached (pool '{pool}')")]
    AlreadyManaged {
        /// The pool the manager is already attached to
        pool: String,
    },

    /// Manager options are invalid
    #[error("configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },
}

impl Error {
    /// Create a disposed error
    pub fn disposed<S: Into<String>>(pool: S) -> Self {
        Self::Disposed { pool: pool.into() }
    }

    /// Create a max-retries error with no underlying creation failure
    pub fn max_retries<S: Into<String>>(pool: S, attempts: u32) -> Self {
        Self::MaxRetriesReached {
            pool: pool.into(),
            attempts,
            source: None,
        }
    }

    /// Create an already-managed error
    pub fn already_managed<S: Into<String>>(pool: S) -> Self {
        Self::AlreadyManaged { pool: pool.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Check if this error is a capacity/backpressure signal worth retrying
    /// at a higher level
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CreationFailed { .. } | Self::MaxRetriesReached { .. } => true,
            Self::Disposed { .. } | Self::AlreadyManaged { .. } | Self::Configuration { .. } => {
                false
            }
        }
    }

    /// Get the pool identifier associated with this error (if any)
    #[must_use]
    pub fn pool_name(&self) -> Option<&str> {
        match self {
            Self::Configuration { .. } => None,
            Self::CreationFailed { diagnostics } => Some(&diagnostics.pool),
            Self::Disposed { pool, .. }
            | Self::MaxRetriesReached { pool, .. }
            | Self::AlreadyManaged { pool, .. } => Some(pool),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorSink
// ---------------------------------------------------------------------------

/// Out-of-band error notification sink (paging, monitoring).
///
/// [`report`](ErrorSink::report) is invoked once per member-creation
/// failure, in addition to the error being returned to the caller.
/// Implementations must never block the caller.
pub trait ErrorSink: Send + Sync + 'static {
    /// Report a creation failure with its diagnostic payload.
    fn report(&self, error: &Error, context: &str, diagnostics: &CreationDiagnostics);
}

/// Default sink that records the failure in the structured log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, error: &Error, context: &str, diagnostics: &CreationDiagnostics) {
        tracing::error!(
            pool = %diagnostics.pool,
            context,
            live = diagnostics.resource_count,
            available = diagnostics.available_count,
            in_use = diagnostics.usage_count,
            available_memory_bytes = diagnostics.available_memory_bytes,
            %error,
            "member creation failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnostics() -> CreationDiagnostics {
        CreationDiagnostics {
            pool: "quotes".to_string(),
            resource_count: 4,
            available_count: 1,
            usage_count: 3,
            available_memory_bytes: Some(1 << 30),
        }
    }

    #[test]
    fn creation_failed_display_includes_counts() {
        let err = Error::CreationFailed {
            diagnostics: diagnostics(),
        };
        let text = err.to_string();
        assert!(text.contains("quotes"));
        assert!(text.contains("4 live"));
        assert!(text.contains("3 in use"));
    }

    #[test]
    fn retryable_classification() {
        assert!(
            Error::CreationFailed {
                diagnostics: diagnostics()
            }
            .is_retryable()
        );
        assert!(Error::max_retries("quotes", 10).is_retryable());
        assert!(!Error::disposed("quotes").is_retryable());
        assert!(!Error::already_managed("quotes").is_retryable());
        assert!(!Error::configuration("bad").is_retryable());
    }

    #[test]
    fn pool_name_accessor() {
        assert_eq!(Error::disposed("claims").pool_name(), Some("claims"));
        assert_eq!(Error::configuration("bad").pool_name(), None);
        assert_eq!(
            Error::CreationFailed {
                diagnostics: diagnostics()
            }
            .pool_name(),
            Some("quotes")
        );
    }

    #[test]
    fn memory_probe_does_not_panic() {
        // Value is platform-dependent; we only care that the probe is safe.
        let _ = available_memory_bytes();
    }
}
