//! Diff record wire formats: tab-separated text and newline-delimited JSON.

mod json;
mod text;

pub use json::JsonWriter;
pub use text::TextWriter;

use std::io::Write;

use crate::error::DiffError;
use crate::value::DiffRecord;

/// Writes a stream of diff records to an output sink in one wire format.
pub trait DiffWriter {
    fn write_record(&mut self, out: &mut dyn Write, record: &DiffRecord) -> Result<(), DiffError>;
}

pub fn writer_for(json: bool) -> Box<dyn DiffWriter> {
    if json {
        Box::new(JsonWriter)
    } else {
        Box::new(TextWriter)
    }
}
