// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Inventory code validation and in-memory scan log.
//!
//! Lines from the scanner are re-validated here before being counted as
//! inventory codes. Duplicates are detected by plain set membership.

use chrono::{DateTime, Local};
use std::collections::HashSet;

/// Clean raw scanner input.
///
/// Removes CR/LF anywhere in the input and trims surrounding whitespace.
/// Returns `None` if nothing is left.
pub fn parse_raw_input(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }

    let cleaned: String = raw.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// A code is valid when non-empty and free of control characters (space allowed).
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && !code.chars().any(|c| (c as u32) < 32)
}

/// One accepted scan.
#[derive(Debug, Clone)]
pub struct ScanRecord {
    pub timestamp: DateTime<Local>,
    pub code: String,
}

/// Outcome of offering a line to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// New code, recorded.
    Accepted(String),
    /// Code seen earlier in this session.
    Duplicate(String),
    /// Line rejected by validation.
    Invalid,
}

/// Session scan log.
#[derive(Debug, Default)]
pub struct ScanLog {
    records: Vec<ScanRecord>,
    seen: HashSet<String>,
}

impl ScanLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a received line and record it unless it is a duplicate.
    pub fn offer(&mut self, line: &str) -> ScanOutcome {
        let code = match parse_raw_input(line) {
            Some(code) if is_valid_code(&code) => code,
            _ => return ScanOutcome::Invalid,
        };

        if self.seen.contains(&code) {
            return ScanOutcome::Duplicate(code);
        }

        self.seen.insert(code.clone());
        self.records.push(ScanRecord {
            timestamp: Local::now(),
            code: code.clone(),
        });
        ScanOutcome::Accepted(code)
    }

    pub fn is_duplicate(&self, code: &str) -> bool {
        self.seen.contains(code)
    }

    pub fn records(&self) -> &[ScanRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&ScanRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.seen.clear();
    }
}
