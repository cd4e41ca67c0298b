use std::io::Write;

use serde::Serialize;

use crate::error::DiffError;
use crate::value::DiffRecord;

use super::DiffWriter;

#[derive(Serialize)]
struct JsonRecord<'a> {
    sign: &'a str,
    row: Vec<String>,
}

/// `{"sign":"+","row":["...", ...]}`, one object per line.
pub struct JsonWriter;

impl DiffWriter for JsonWriter {
    fn write_record(&mut self, out: &mut dyn Write, record: &DiffRecord) -> Result<(), DiffError> {
        let json_record = JsonRecord {
            sign: match record.sign {
                crate::value::Sign::Minus => "-",
                crate::value::Sign::Plus => "+",
            },
            row: record.row.iter().map(|v| v.to_string()).collect(),
        };
        let line = serde_json::to_string(&json_record)
            .map_err(|e| DiffError::configuration(format!("failed serialising diff record: {e}")))?;
        writeln!(out, "{line}")
            .map_err(|e| DiffError::configuration(format!("failed writing json output: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Sign, Value};

    #[test]
    fn serialises_sign_and_row_as_strings() {
        let mut buf = Vec::new();
        let record = DiffRecord {
            sign: Sign::Plus,
            row: vec![Value::Int(5000)],
        };
        JsonWriter.write_record(&mut buf, &record).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap().trim(),
            r#"{"sign":"+","row":["5000"]}"#
        );
    }
}
