use crate::error::{Result, UpsertError};
use crate::types::Record;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Reads records from a JSON array file or an NDJSON file (one object per line).
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<Record>> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);

    let starts_with_array = {
        let buf = reader.fill_buf()?;
        buf.iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'[')
    };

    if starts_with_array {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        return parse_array(&content);
    }

    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line).map_err(|e| {
            UpsertError::Config(format!("line {}: invalid JSON record: {e}", index + 1))
        })?;
        records.push(Record::try_from(value)?);
    }
    Ok(records)
}

fn parse_array(content: &str) -> Result<Vec<Record>> {
    match serde_json::from_str::<Value>(content)? {
        Value::Array(items) => items.into_iter().map(Record::try_from).collect(),
        _ => Err(UpsertError::Config("expected a JSON array of records".into())),
    }
}
