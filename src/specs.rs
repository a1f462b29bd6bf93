//! Search spec sheet.
//!
//! The sheet is a TOML file of `[[spec]]` rows mirroring a spreadsheet:
//! every column is optional and loosely typed, blank cells mean "not set".
//!
//! ```toml
//! [[spec]]
//! author = "Italo Calvino"
//! title = "Invisible Cities"
//! year = 1972
//! max_price = 50
//! accept_new = "Y"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::models::SearchSpec;

/// A spreadsheet cell: numbers may arrive as text and flags as words.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Cell {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    fn text(&self) -> Option<String> {
        let text = match self {
            Cell::Bool(b) => b.to_string(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Text(s) => s.trim().to_string(),
        };
        (!text.is_empty() && !text.eq_ignore_ascii_case("nan")).then_some(text)
    }

    fn number(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Text(s) => s.trim().trim_start_matches('$').parse().ok(),
            Cell::Bool(_) => None,
        }
    }

    fn flag(&self) -> bool {
        match self {
            Cell::Bool(b) => *b,
            Cell::Int(i) => *i == 1,
            Cell::Float(f) => *f == 1.0,
            Cell::Text(s) => matches!(s.trim().to_uppercase().as_str(), "Y" | "YES" | "TRUE" | "1"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpecRow {
    author: Option<Cell>,
    title: Option<Cell>,
    year: Option<Cell>,
    #[serde(alias = "keyword")]
    keywords: Option<Cell>,
    #[serde(alias = "isbn")]
    code: Option<Cell>,
    max_price: Option<Cell>,
    accept_new: Option<Cell>,
}

#[derive(Debug, Deserialize)]
struct SpecSheet {
    #[serde(default)]
    spec: Vec<SpecRow>,
}

pub struct SpecSheetLoader {
    path: PathBuf,
}

impl SpecSheetLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<SearchSpec>> {
        info!("Loading search specs from: {}", self.path.display());
        let content = fs::read_to_string(&self.path).map_err(|e| {
            AppError::config(format!("cannot read spec sheet {}: {e}", self.path.display()))
        })?;
        let specs = parse_sheet(&content)?;
        info!("Loaded {} search specifications", specs.len());
        Ok(specs)
    }
}

/// Parse sheet content. Rows without an author are skipped.
pub fn parse_sheet(content: &str) -> Result<Vec<SearchSpec>> {
    let sheet: SpecSheet = toml::from_str(content)?;

    let mut specs = Vec::with_capacity(sheet.spec.len());
    for (idx, row) in sheet.spec.into_iter().enumerate() {
        let row_no = idx + 1;
        let Some(author) = row.author.as_ref().and_then(Cell::text) else {
            debug!("Skipping row {}: no author specified", row_no);
            continue;
        };

        let year = row.year.as_ref().and_then(|cell| {
            let parsed = cell.number().map(|n| n.trunc() as i32);
            if parsed.is_none() && cell.text().is_some() {
                warn!("Row {}: invalid year {:?}, ignoring", row_no, cell);
            }
            parsed
        });

        let max_price = row.max_price.as_ref().and_then(|cell| {
            let parsed = cell.number().filter(|p| *p >= 0.0);
            if parsed.is_none() && cell.text().is_some() {
                warn!("Row {}: invalid max price {:?}, ignoring", row_no, cell);
            }
            parsed
        });

        let spec = SearchSpec {
            author,
            title: row.title.as_ref().and_then(Cell::text),
            year,
            keywords: row.keywords.as_ref().and_then(Cell::text),
            code: row.code.as_ref().and_then(Cell::text),
            max_price,
            accept_new: row.accept_new.as_ref().is_some_and(Cell::flag),
        };
        debug!("Loaded spec: {}", spec.describe());
        specs.push(spec);
    }
    Ok(specs)
}
