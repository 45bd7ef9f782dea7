//! TLE file reading.
//!
//! CelesTrak-style files: three lines per satellite, a name line followed
//! by the two element lines starting with `1 ` and `2 `.

use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TleError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed TLE entry for {name:?}: {reason}")]
    Malformed { name: String, reason: String },

    #[error("elements for {name:?} do not parse: {reason}")]
    Elements { name: String, reason: String },
}

/// One satellite's entry, lines kept verbatim for the SGP4 parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TleEntry {
    pub name: String,
    pub line1: String,
    pub line2: String,
}

impl TleEntry {
    /// NORAD catalog number, from columns 3-7 of line 1.
    pub fn catalog_number(&self) -> Result<u64, TleError> {
        self.line1
            .get(2..7)
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| TleError::Malformed {
                name: self.name.clone(),
                reason: "catalog number field".to_string(),
            })
    }
}

/// Parse a whole TLE file.
pub fn parse_file(path: &Path) -> Result<Vec<TleEntry>, TleError> {
    let text = std::fs::read_to_string(path).map_err(|source| TleError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&text)
}

/// Parse TLE text: repeated (name, line 1, line 2) triples.
pub fn parse(text: &str) -> Result<Vec<TleEntry>, TleError> {
    let mut entries = Vec::new();
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());

    while let Some(name) = lines.next() {
        let name = name.trim().to_string();
        let line1 = lines.next().unwrap_or("").trim_end().to_string();
        let line2 = lines.next().unwrap_or("").trim_end().to_string();
        if !line1.starts_with("1 ") {
            return Err(TleError::Malformed {
                name,
                reason: format!("expected line 1, got {line1:?}"),
            });
        }
        if !line2.starts_with("2 ") {
            return Err(TleError::Malformed {
                name,
                reason: format!("expected line 2, got {line2:?}"),
            });
        }
        entries.push(TleEntry { name, line1, line2 });
    }
    Ok(entries)
}

#[cfg(test)]
pub(crate) const ISS_TLE: &str = "\
ISS (ZARYA)
1 25544U 98067A   26015.51782528 -.00002182  00000-0 -11606-4 0  9995
2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.49309239260080
";
