//! Error taxonomy shared by the planning crates.

use chrono::NaiveDateTime;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by core model operations.
///
/// None of these abort a planning run: callers degrade the affected item or
/// value and keep going.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// A field of an item row could not be read
    #[error("cannot parse {field} from {value:?}")]
    Parse {
        /// Field name
        field: &'static str,
        /// Raw text that failed to parse
        value: String,
    },

    /// No capacity source produced a positive value
    #[error("daily capacity unavailable from every source")]
    CapacityUnavailable,

    /// A time range ended before it started
    #[error("invalid range: end {end} is before start {start}")]
    InvalidRange {
        /// Range start
        start: NaiveDateTime,
        /// Range end
        end: NaiveDateTime,
    },

    /// A recompute was requested while another one was running
    #[error("a recompute run is already in progress")]
    RunAlreadyInProgress,

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    Config(String),
}
