//! Plate text extraction from raw OCR output.
//!
//! Two plate shapes are accepted: three letters, a digit, a letter and two
//! digits (`ABC1D23`), or three letters followed by four digits (`ABC1234`).
//! OCR output is noisy, so the grammar is searched for anywhere in the text
//! after dropping whitespace and hyphens, and the first hit wins.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

// ASCII classes only; `(?i)` would also match the Kelvin sign.
static PLATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z]{3}[0-9][A-Za-z][0-9]{2}|[A-Za-z]{3}[0-9]{4}")
        .expect("plate pattern is valid")
});

static WHOLE_PLATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Z]{3}[0-9][A-Z][0-9]{2}|[A-Z]{3}[0-9]{4})$")
        .expect("plate pattern is valid")
});

/// A normalized plate number, upper-case, in one of the two accepted shapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlateString(String);

impl PlateString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlateString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<PlateString> for String {
    fn from(plate: PlateString) -> Self {
        plate.0
    }
}

impl TryFrom<String> for PlateString {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if WHOLE_PLATE_PATTERN.is_match(&value) {
            Ok(Self(value))
        } else {
            Err(anyhow::anyhow!("'{}' is not a valid plate number", value))
        }
    }
}

impl PartialEq<&str> for PlateString {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Remove the separators OCR tends to report inside a plate.
pub fn clean_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

/// Extract the first plate number found in `raw`, upper-cased.
pub fn extract_plate(raw: &str) -> Option<PlateString> {
    let cleaned = clean_text(raw);
    let found = PLATE_PATTERN.find(&cleaned)?;
    Some(PlateString(found.as_str().to_ascii_uppercase()))
}

/// Stateless extractor, kept as a type so the pipeline can hold it like its
/// other stages.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlateTextExtractor;

impl PlateTextExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, raw: &str) -> Option<PlateString> {
        let plate = extract_plate(raw);
        match &plate {
            Some(p) => tracing::debug!(raw = %raw, plate = %p, "plate text extracted"),
            None => tracing::debug!(raw = %raw, "no plate pattern in OCR text"),
        }
        plate
    }
}
