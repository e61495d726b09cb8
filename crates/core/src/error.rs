//! Error types for the mapping runtime
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Every failure surfaces to the caller as an `Err`; nothing is retried or
//! swallowed inside the runtime. Retry policy belongs to the caller.

use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the mapping runtime
#[derive(Debug, Error)]
pub enum Error {
    /// Schema compilation encountered a field declaration it has no binder for.
    /// Fatal at startup.
    #[error("unsupported field type for {entity}.{field}: {detail}")]
    UnsupportedFieldType {
        /// Owning entity type
        entity: String,
        /// Offending field key
        field: String,
        /// What made the declaration unacceptable
        detail: String,
    },

    /// An entity-typed field was read before the referenced entity was joined
    /// into the document under its shadow key.
    #[error("entity field {field} can not be read from the document, must be joined")]
    MissingJoin {
        /// Field key that was read
        field: String,
    },

    /// A setter was invoked on an embedded, relation or collection field.
    #[error("field {field} is read-only and can not be assigned")]
    ReadOnlyRelation {
        /// Field key that was written
        field: String,
    },

    /// A single-result query returned more than one document.
    #[error("query for {type_name} returned more than one element")]
    MultipleResults {
        /// Entity type queried
        type_name: String,
    },

    /// Network, HTTP or driver failure, propagated with the backend status.
    #[error("backend transport error ({status}): {message}")]
    Transport {
        /// Backend status code (HTTP status or driver error code), 0 if unknown
        status: u16,
        /// Backend message, newlines stripped
        message: String,
    },

    /// Direct assignment to a state-history field. History fields are
    /// append-only via `StateHistory::set`.
    #[error("state history field {field} can not be assigned")]
    StateAssignment {
        /// Field key that was written
        field: String,
    },

    /// No schema model registered for the requested type.
    #[error("schema model for {type_name} not found")]
    UnknownModel {
        /// Type name that was looked up
        type_name: String,
    },

    /// No index with the given name declared on the type.
    #[error("index {index} not declared on {type_name}")]
    UnknownIndex {
        /// Entity type the lookup ran against
        type_name: String,
        /// Missing index name
        index: String,
    },

    /// An accessor was used with a kind that does not match the registered
    /// binder for the field.
    #[error("field {entity}.{field} is registered as {registered}, accessed as {requested}")]
    KindMismatch {
        /// Owning entity type
        entity: String,
        /// Field key
        field: String,
        /// Kind the field was registered with
        registered: &'static str,
        /// Kind the accessor asked for
        requested: &'static str,
    },

    /// A document value could not be encoded or decoded.
    #[error("codec error for {field}: {detail}")]
    Codec {
        /// Field key (or pseudo-field for bookkeeping values)
        field: String,
        /// Description of the failure
        detail: String,
    },

    /// An operation that requires a persisted identity ran on an entity
    /// without one.
    #[error("entity {type_name} has no id")]
    MissingId {
        /// Entity type of the operand
        type_name: String,
    },

    /// An operation that requires a revision token ran on an entity without
    /// one.
    #[error("entity {type_name} has no revision")]
    MissingRev {
        /// Entity type of the operand
        type_name: String,
    },
}

impl Error {
    /// Build a `Transport` error, stripping newlines from the message the
    /// same way raw backend response bodies are flattened before logging.
    pub fn transport(status: u16, message: impl Into<String>) -> Self {
        let message = message.into().replace(['\n', '\r'], " ");
        Error::Transport { status, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_unsupported_field_type() {
        let err = Error::UnsupportedFieldType {
            entity: "Order".to_string(),
            field: "lines".to_string(),
            detail: "relations require an entity model".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Order.lines"));
        assert!(msg.contains("relations require an entity model"));
    }

    #[test]
    fn test_error_display_missing_join() {
        let err = Error::MissingJoin {
            field: "customer".to_string(),
        };
        assert!(err.to_string().contains("must be joined"));
    }

    #[test]
    fn test_error_display_multiple_results() {
        let err = Error::MultipleResults {
            type_name: "Order".to_string(),
        };
        assert!(err.to_string().contains("more than one element"));
    }

    #[test]
    fn test_transport_strips_newlines() {
        let err = Error::transport(500, "first\nsecond\rthird");
        let msg = err.to_string();
        assert!(msg.contains("first second third"));
        assert!(msg.contains("500"));
    }

    #[test]
    fn test_error_display_kind_mismatch() {
        let err = Error::KindMismatch {
            entity: "Order".to_string(),
            field: "total".to_string(),
            registered: "long",
            requested: "string",
        };
        let msg = err.to_string();
        assert!(msg.contains("registered as long"));
        assert!(msg.contains("accessed as string"));
    }
}
