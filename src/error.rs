use crate::history::HistoryStack;
use crate::message::DocId;
use thiserror::Error;

/// Failures surfaced by the headers core.
///
/// Updates or removals for rows that are already gone are not errors.
/// `NotFound` comes only from direct user commands, `Config` from field
/// layout validation and rendering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeadersError {
    #[error("no message with docid {0} in the headers list")]
    NotFound(DocId),

    #[error("header field '{field}': {reason}")]
    Config { field: String, reason: String },

    #[error("no more queries in the {0} history")]
    HistoryEmpty(HistoryStack),
}

impl HeadersError {
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        HeadersError::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
