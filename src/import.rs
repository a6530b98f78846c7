//! Roster import: turn rows from spreadsheets we do not control into
//! normalized student records.
//!
//! Column headers vary wildly between source templates (school exports,
//! Google Forms, hand-made sheets), so extraction runs a fixed ladder of
//! header patterns and takes the first rule that yields a non-empty value.
//! Rows that never produce both an id and a name are dropped silently; the
//! caller only reports counts.

use anyhow::Context;
use calamine::{open_workbook_auto, Reader};
use regex::Regex;
use serde::Serialize;
use std::io;
use std::path::Path;
use std::sync::OnceLock;

/// One parsed row: (header, value) pairs in source column order.
pub type RosterRow = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedStudent {
    pub student_id: String,
    pub name: String,
}

// Most specific first; a later rule is never consulted once an earlier one
// produced a non-empty value.
fn id_rules() -> &'static [Regex] {
    static RULES: OnceLock<Vec<Regex>> = OnceLock::new();
    RULES.get_or_init(|| {
        compile(&[
            r"(?i)^student\s*id$",
            r"(?i)\bstudent\s*id\b",
            r"(?i)^id$",
            r"(?i)^code$",
        ])
    })
}

fn name_rules() -> &'static [Regex] {
    static RULES: OnceLock<Vec<Regex>> = OnceLock::new();
    RULES.get_or_init(|| {
        compile(&[
            r"(?i)^name$",
            r"(?i)^student\s*name$",
            // Multi-word school template: "Student Name - Lastname Firstname".
            r"(?i)student\s*name.*lastname.*firstname",
            // Google Forms export variant: "... (LastName, FirstName)".
            r"(?i)\(lastname,\s*firstname",
        ])
    })
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static header pattern"))
        .collect()
}

/// Value of the first header matching `re`, trimmed. An empty match still
/// ends the scan for this rule; the ladder moves on to the next rule.
fn find_val(row: &RosterRow, re: &Regex) -> String {
    for (header, value) in row {
        if re.is_match(header.trim()) {
            return value.trim().to_string();
        }
    }
    String::new()
}

fn first_non_empty(row: &RosterRow, rules: &[Regex]) -> String {
    for re in rules {
        let v = find_val(row, re);
        if !v.is_empty() {
            return v;
        }
    }
    String::new()
}

/// Pure extraction step. Returns `None` when either field stays empty after
/// every fallback pattern; the row is skipped, never surfaced as an error.
pub fn extract_student_row(row: &RosterRow) -> Option<NormalizedStudent> {
    let student_id = first_non_empty(row, id_rules());
    let name = first_non_empty(row, name_rules());
    if student_id.is_empty() || name.is_empty() {
        return None;
    }
    Some(NormalizedStudent { student_id, name })
}

/// Headered CSV into rows. Blank records are skipped; short records pad with
/// empty values.
pub fn read_csv_rows<R: io::Read>(rdr: R) -> anyhow::Result<Vec<RosterRow>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(rdr);
    let headers: Vec<String> = reader
        .headers()
        .context("read csv header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("read csv record")?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let row: RosterRow = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), record.get(i).unwrap_or("").to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// First sheet of a workbook, first row as headers.
pub fn read_xlsx_rows(path: &Path) -> anyhow::Result<Vec<RosterRow>> {
    let mut workbook = open_workbook_auto(path).context("open workbook")?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("workbook has no sheets"))?;
    let range = workbook
        .worksheet_range(&sheet)
        .context("read first sheet")?;

    let mut rows = Vec::new();
    let mut cells = range.rows();
    let Some(header_cells) = cells.next() else {
        return Ok(rows);
    };
    let headers: Vec<String> = header_cells
        .iter()
        .map(|c| c.to_string().trim().to_string())
        .collect();

    for record in cells {
        if record.iter().all(|c| c.to_string().trim().is_empty()) {
            continue;
        }
        let row: RosterRow = headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let value = record.get(i).map(|c| c.to_string()).unwrap_or_default();
                (h.clone(), value)
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Dispatch on extension: `.csv` goes through the CSV reader, everything
/// else is treated as a workbook.
pub fn read_roster_file(path: &Path) -> anyhow::Result<Vec<RosterRow>> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if is_csv {
        let file = std::fs::File::open(path).context("open roster csv")?;
        read_csv_rows(file)
    } else {
        read_xlsx_rows(path)
    }
}
