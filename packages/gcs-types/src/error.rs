use thiserror::Error;

/// Validation failure for a wire record. Everything crossing a process
/// boundary (subscriber frame, serial line, bus payload) is checked against
/// the schema before it is routed; the broker maps these onto
/// `error{code:...}` envelopes.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("field '{field}' out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("field '{field}' must not be empty")]
    Empty { field: &'static str },

    #[error("missing parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("malformed parameter '{field}': {message}")]
    BadParameter { field: &'static str, message: String },

    #[error("unknown command type '{0}'")]
    UnknownCommandType(String),

    #[error("{0}")]
    Invariant(&'static str),
}
