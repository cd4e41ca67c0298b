use std::io::Write;

use crate::error::DiffError;
use crate::value::DiffRecord;

use super::DiffWriter;

/// `'+' row...` / `'-' row...`, tab-separated column values.
pub struct TextWriter;

impl DiffWriter for TextWriter {
    fn write_record(&mut self, out: &mut dyn Write, record: &DiffRecord) -> Result<(), DiffError> {
        let columns = record
            .row
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\t");
        writeln!(out, "{} {columns}", record.sign)
            .map_err(|e| DiffError::configuration(format!("failed writing text output: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Sign, Value};

    #[test]
    fn formats_tab_separated_row_with_sign_prefix() {
        let mut buf = Vec::new();
        let record = DiffRecord {
            sign: Sign::Minus,
            row: vec![Value::Int(1), Value::Text("alice".into())],
        };
        TextWriter.write_record(&mut buf, &record).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "- 1\talice\n");
    }
}
