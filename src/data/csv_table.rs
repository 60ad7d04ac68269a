use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use crate::data::sanitize::strip_invisible;

/// A record whose field count didn't match the header.
#[derive(Debug, Clone, PartialEq)]
pub struct BadLine {
    pub line: usize,
    pub raw: String,
}

/// Header-indexed CSV table. Headers and cells are stripped of invisible characters;
/// when cleaning produces duplicate column names the first occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct CsvTable {
    headers: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
    bad_lines: Vec<BadLine>,
}

impl CsvTable {
    pub fn parse(text: &str) -> Self {
        let mut records = split_records(text).into_iter();

        let headers: Vec<String> = match records.next() {
            Some((_, _, fields)) => fields.iter().map(|h| strip_invisible(h)).collect(),
            None => return Self::default(),
        };

        let mut index = HashMap::new();
        for (i, header) in headers.iter().enumerate() {
            if index.contains_key(header) {
                warn!("Duplicate column '{}' after cleaning, keeping first", header);
                continue;
            }
            index.insert(header.clone(), i);
        }

        let mut rows = Vec::new();
        let mut bad_lines = Vec::new();

        for (line, raw, fields) in records {
            if fields.len() == 1 && fields[0].trim().is_empty() {
                continue;
            }
            if fields.len() != headers.len() {
                bad_lines.push(BadLine { line, raw });
                continue;
            }
            rows.push(fields.iter().map(|f| strip_invisible(f)).collect());
        }

        Self { headers, index, rows, bad_lines }
    }

    /// Read and parse a file, logging bad lines and saving them next to the source.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        let table = Self::parse(&text);

        if !table.bad_lines.is_empty() {
            let bad_path = bad_lines_path(path);
            warn!(
                "Found {} bad line(s) in {}, saving to {}",
                table.bad_lines.len(),
                path.display(),
                bad_path.display()
            );
            table.write_bad_lines(path, &bad_path)?;
        }

        info!("Loaded {} rows from {}", table.len(), path.display());
        Ok(table)
    }

    fn write_bad_lines(&self, source: &Path, out: &Path) -> Result<()> {
        let mut file = fs::File::create(out)
            .with_context(|| format!("Failed to create bad lines file: {}", out.display()))?;

        writeln!(file, "# Bad lines from CSV parsing")?;
        writeln!(file, "# Source file: {}", source.display())?;
        writeln!(file, "# Total bad lines: {}", self.bad_lines.len())?;
        writeln!(file)?;

        for (i, bad) in self.bad_lines.iter().enumerate() {
            writeln!(file, "# Bad line {} (line {}):", i + 1, bad.line)?;
            writeln!(file, "{}", bad.raw)?;
            writeln!(file)?;
        }

        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    pub fn bad_lines(&self) -> &[BadLine] {
        &self.bad_lines
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = CsvRow<'_>> {
        self.rows.iter().map(move |values| CsvRow { table: self, values })
    }
}

/// Borrowed view of one table row.
#[derive(Debug, Clone, Copy)]
pub struct CsvRow<'a> {
    table: &'a CsvTable,
    values: &'a [String],
}

impl<'a> CsvRow<'a> {
    /// Cell for `column`; missing columns and empty cells are `None`.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let idx = *self.table.index.get(column)?;
        self.values
            .get(idx)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// (column, cell) pairs in header order, skipping shadowed duplicate columns.
    pub fn columns(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let table = self.table;
        let values = self.values;
        table
            .headers
            .iter()
            .enumerate()
            .filter(move |(i, h)| table.index.get(h.as_str()) == Some(i))
            .map(move |(i, h)| (h.as_str(), values[i].as_str()))
    }
}

fn bad_lines_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "table".to_string());
    path.with_file_name(format!("{}_bad_lines.txt", stem))
}

/// Split CSV text into records, honoring quoted fields (which may span lines and
/// escape quotes by doubling). Yields (1-based start line, raw text, fields).
fn split_records(text: &str) -> Vec<(usize, String, Vec<String>)> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut raw = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut start_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                raw.push(c);
                if chars.peek() == Some(&'"') {
                    chars.next();
                    raw.push('"');
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.trim().is_empty() => {
                raw.push(c);
                field.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => {
                raw.push(c);
                fields.push(std::mem::take(&mut field));
            }
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
                records.push((start_line, std::mem::take(&mut raw), std::mem::take(&mut fields)));
                line += 1;
                start_line = line;
            }
            _ => {
                if c == '\n' {
                    line += 1;
                }
                raw.push(c);
                field.push(c);
            }
        }
    }

    if !field.is_empty() || !fields.is_empty() || !raw.is_empty() {
        fields.push(field);
        records.push((start_line, raw, fields));
    }

    records
}

/// Quote a field when it contains a delimiter, quote or newline.
pub fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn join_row<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fields
        .into_iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}
