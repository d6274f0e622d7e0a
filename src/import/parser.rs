//! Import file parsing.
//!
//! One JSON object per line. Required fields: `table` and an integer `id`;
//! `title` and `body` are used when present, every other field is kept in
//! the payload and folded into the searchable body. Any malformed line fails
//! the whole file, which the queue treats as a retryable failure.

use std::path::Path;

use serde_json::Value;

use crate::types::IndexedDocument;

use super::error::{ImportError, ImportResult};

/// Parse a JSONL import file into an ordered batch of index candidates.
pub fn parse_jsonl(path: &Path) -> ImportResult<Vec<IndexedDocument>> {
    let content = std::fs::read_to_string(path).map_err(|e| ImportError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut docs = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        docs.push(parse_line(path, index + 1, line)?);
    }
    Ok(docs)
}

fn parse_line(path: &Path, line_no: usize, line: &str) -> ImportResult<IndexedDocument> {
    let parse_error = |reason: String| ImportError::Parse {
        path: path.to_path_buf(),
        line: line_no,
        reason,
    };

    let value: Value =
        serde_json::from_str(line).map_err(|e| parse_error(e.to_string()))?;
    let record = value
        .as_object()
        .ok_or_else(|| parse_error("expected a JSON object".to_string()))?;

    let table = record
        .get("table")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| parse_error("missing string field 'table'".to_string()))?;
    let id = record
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| parse_error("missing integer field 'id'".to_string()))?;

    let title = match record.get("title").and_then(Value::as_str) {
        Some(t) if !t.is_empty() => format!("[{id}] {t}"),
        _ => format!("[{id}] {table}"),
    };

    let mut body_parts = Vec::new();
    if let Some(body) = record.get("body").and_then(Value::as_str) {
        body_parts.push(body.to_string());
    }
    for (key, value) in record {
        if matches!(key.as_str(), "table" | "id" | "title" | "body") {
            continue;
        }
        if let Some(text) = value.as_str() {
            body_parts.push(format!("{key}: {text}"));
        }
    }

    let body = body_parts.join("; ");
    Ok(IndexedDocument::new(&table, id, title, body, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_valid_file() {
        let temp = TempDir::new().unwrap();
        let path = write_file(
            &temp,
            "batch.jsonl",
            r#"{"table": "products", "id": 1, "title": "widget", "body": "a widget", "category": "tools"}
{"table": "products", "id": 2, "title": "gadget"}

{"table": "complaints", "id": 9, "severity": "high"}
"#,
        );

        let docs = parse_jsonl(&path).unwrap();
        assert_eq!(docs.len(), 3);

        assert_eq!(docs[0].document_id, "products:1");
        assert_eq!(docs[0].title, "[1] widget");
        assert_eq!(docs[0].body, "a widget; category: tools");
        assert_eq!(docs[0].payload["category"], "tools");

        assert_eq!(docs[1].title, "[2] gadget");
        assert_eq!(docs[1].body, "");

        assert_eq!(docs[2].document_id, "complaints:9");
        assert_eq!(docs[2].title, "[9] complaints");
        assert_eq!(docs[2].body, "severity: high");
    }

    #[test]
    fn test_parse_reports_line_number() {
        let temp = TempDir::new().unwrap();
        let path = write_file(
            &temp,
            "bad.jsonl",
            "{\"table\": \"products\", \"id\": 1}\nnot json\n",
        );

        let err = parse_jsonl(&path).unwrap_err();
        match err {
            ImportError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_requires_table_and_id() {
        let temp = TempDir::new().unwrap();

        let path = write_file(&temp, "no_table.jsonl", "{\"id\": 1}\n");
        assert!(matches!(
            parse_jsonl(&path),
            Err(ImportError::Parse { line: 1, .. })
        ));

        let path = write_file(&temp, "no_id.jsonl", "{\"table\": \"products\"}\n");
        assert!(parse_jsonl(&path).is_err());
    }

    #[test]
    fn test_parse_missing_file_is_read_error() {
        let temp = TempDir::new().unwrap();
        let err = parse_jsonl(&temp.path().join("absent.jsonl")).unwrap_err();
        assert!(matches!(err, ImportError::FileRead { .. }));
    }
}
