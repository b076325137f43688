//! Batch input reading
//!
//! One pipeline run consumes one flat file of provider rows: a header line
//! naming the columns, then one comma-separated row per provider. Unset
//! values are empty strings and are normalized to absent. Rows that cannot
//! enter the pipeline (missing identifier, wrong field count, duplicate
//! identifier) are rejected with their line number and surfaced in the run
//! report — never silently dropped.

use crate::models::{ProviderRecord, RejectedRow};
use provdir_common::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Column holding the record identifier
const IDENTIFIER_COLUMN: &str = "provider_id";

/// Parsed batch: accepted records plus rejected rows with reasons
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub records: Vec<ProviderRecord>,
    pub rejected: Vec<RejectedRow>,
}

/// Read and parse a batch file
pub fn read_batch(path: &Path) -> Result<ParsedBatch> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidInput(format!("cannot read {}: {}", path.display(), e)))?;
    parse_batch(&content)
}

/// Parse batch content (header line + data rows)
pub fn parse_batch(content: &str) -> Result<ParsedBatch> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty());

    let header = match lines.next() {
        Some((_, header)) => split_row(header)
            .into_iter()
            .map(|h| normalize_column(&h))
            .collect::<Vec<_>>(),
        None => return Err(Error::InvalidInput("input batch is empty".to_string())),
    };

    if !header.iter().any(|h| h == IDENTIFIER_COLUMN) {
        return Err(Error::InvalidInput(format!(
            "input header has no {} column",
            IDENTIFIER_COLUMN
        )));
    }

    let mut batch = ParsedBatch::default();
    let mut seen = BTreeSet::new();

    for (line, raw) in lines {
        let values = split_row(raw);
        if values.len() != header.len() {
            batch.rejected.push(RejectedRow {
                line,
                reason: format!(
                    "expected {} fields, found {}",
                    header.len(),
                    values.len()
                ),
            });
            continue;
        }

        let mut fields: BTreeMap<String, String> = header
            .iter()
            .cloned()
            .zip(values.into_iter())
            .collect();

        let identifier = fields
            .remove(IDENTIFIER_COLUMN)
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        if identifier.is_empty() {
            batch.rejected.push(RejectedRow {
                line,
                reason: "missing identifier".to_string(),
            });
            continue;
        }
        if !seen.insert(identifier.clone()) {
            batch.rejected.push(RejectedRow {
                line,
                reason: format!("duplicate identifier {}", identifier),
            });
            continue;
        }

        batch.records.push(ProviderRecord::from_input(identifier, fields));
    }

    Ok(batch)
}

/// Map input column aliases onto the canonical field names the stages use
fn normalize_column(raw: &str) -> String {
    let name = raw.trim().to_lowercase();
    match name.as_str() {
        "full_name" => "name".to_string(),
        "npi" => "registry_number".to_string(),
        _ => name,
    }
}

/// Split one comma-separated row, honoring double quotes and "" escapes
fn split_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "provider_id,full_name,address,city,state,phone,specialty,npi";

    #[test]
    fn parses_rows_and_normalizes_columns() {
        let content = format!(
            "{}\nP001,Dr. Ada Cole,\"12 Main St, Suite 4\",Springfield,IL,555-0100,Cardiology,1234567890\n",
            HEADER
        );
        let batch = parse_batch(&content).unwrap();

        assert_eq!(batch.records.len(), 1);
        assert!(batch.rejected.is_empty());

        let record = &batch.records[0];
        assert_eq!(record.identifier, "P001");
        assert_eq!(record.field("name"), Some("Dr. Ada Cole"));
        assert_eq!(record.field("address"), Some("12 Main St, Suite 4"));
        assert_eq!(record.field("registry_number"), Some("1234567890"));
    }

    #[test]
    fn rejects_rows_without_identifier() {
        let content = format!("{}\n,Dr. No Id,1 Elm,Town,IL,555,Cardiology,\n", HEADER);
        let batch = parse_batch(&content).unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].line, 2);
        assert!(batch.rejected[0].reason.contains("missing identifier"));
    }

    #[test]
    fn rejects_rows_with_wrong_field_count() {
        let content = format!("{}\nP001,Dr. Short Row\n", HEADER);
        let batch = parse_batch(&content).unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.rejected.len(), 1);
        assert!(batch.rejected[0].reason.contains("expected 8 fields"));
    }

    #[test]
    fn rejects_duplicate_identifiers() {
        let content = format!(
            "{}\nP001,A,,,,,,\nP001,B,,,,,,\n",
            HEADER
        );
        let batch = parse_batch(&content).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.rejected.len(), 1);
        assert!(batch.rejected[0].reason.contains("duplicate identifier"));
    }

    #[test]
    fn accounts_for_every_input_row() {
        let content = format!(
            "{}\nP001,A,,,,,,\n,missing,,,,,,\nP002,B,,,,,,\nP001,dup,,,,,,\n",
            HEADER
        );
        let batch = parse_batch(&content).unwrap();
        assert_eq!(batch.records.len() + batch.rejected.len(), 4);
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(parse_batch("").is_err());
    }

    #[test]
    fn header_without_identifier_column_is_an_error() {
        assert!(parse_batch("name,phone\nA,555\n").is_err());
    }

    #[test]
    fn quoted_fields_support_escaped_quotes() {
        let fields = split_row(r#"a,"b ""quoted"" text",c"#);
        assert_eq!(fields, vec!["a", r#"b "quoted" text"#, "c"]);
    }
}
