//! Append-only enum state with built-in change history
//!
//! A state-history field stores both the current state and every transition
//! that led to it:
//!
//! ```json
//! {
//!     "state": {
//!         "value": "PUBLISHED",
//!         "history": [
//!             { "date": 123456, "state": "CREATED" },
//!             { "date": 234567, "state": "VALIDATED" },
//!             { "date": 345678, "state": "PUBLISHED" }
//!         ]
//!     }
//! }
//! ```
//!
//! The only mutation is [`StateHistory::set`], which overwrites `value` and
//! appends a dated entry. The generic property setter refuses these fields
//! with `StateAssignment`. Two writers racing on different copies of the
//! same document are last-writer-wins at the document level; histories are
//! not merged.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::marker::PhantomData;

use crate::document::{DocHandle, DocPath};
use crate::error::{Error, Result};
use crate::model::DocEnum;

/// A dated state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatedState<E> {
    /// When the transition happened
    pub date: DateTime<Utc>,
    /// The state entered
    pub state: E,
}

/// Handle over one state-history field
pub struct StateHistory<E: DocEnum> {
    doc: DocHandle,
    path: DocPath,
    _marker: PhantomData<fn() -> E>,
}

impl<E: DocEnum> StateHistory<E> {
    pub(crate) fn new(doc: DocHandle, path: DocPath) -> Self {
        doc.ensure_object(&path);
        StateHistory {
            doc,
            path,
            _marker: PhantomData,
        }
    }

    /// The current state. A missing value decodes to the default-flagged
    /// member; an unknown symbol decodes to `None`.
    pub fn value(&self) -> Option<E> {
        match self.doc.get_str(&self.path.key("value")) {
            Some(symbol) => E::from_symbol(&symbol),
            None => E::default_variant(),
        }
    }

    /// Transition to a new state, appending a dated history entry
    pub fn set(&self, state: E) {
        self.doc.set(
            &self.path.key("value"),
            Value::String(state.symbol().to_string()),
        );
        let entry = json!({
            "date": Utc::now().timestamp_millis(),
            "state": state.symbol(),
        });
        self.doc.push(&self.path.key("history"), entry);
    }

    /// Every recorded transition, oldest first
    pub fn history(&self) -> Result<Vec<DatedState<E>>> {
        let raw = match self.doc.get(&self.path.key("history")) {
            Some(Value::Array(entries)) => entries,
            _ => return Ok(Vec::new()),
        };
        let mut out = Vec::with_capacity(raw.len());
        for entry in &raw {
            let millis = entry
                .get("date")
                .and_then(Value::as_i64)
                .ok_or_else(|| self.codec_err("history entry has no date"))?;
            let date = Utc
                .timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| self.codec_err("history entry date out of range"))?;
            let symbol = entry
                .get("state")
                .and_then(Value::as_str)
                .ok_or_else(|| self.codec_err("history entry has no state"))?;
            let state = E::from_symbol(symbol)
                .ok_or_else(|| self.codec_err(&format!("unknown state symbol {symbol:?}")))?;
            out.push(DatedState { date, state });
        }
        Ok(out)
    }

    fn codec_err(&self, detail: &str) -> Error {
        Error::Codec {
            field: self.path.to_string(),
            detail: detail.to_string(),
        }
    }
}
