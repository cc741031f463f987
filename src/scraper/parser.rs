use regex::Regex;
use std::sync::LazyLock;

use crate::models::ExtractedRecord;

/// `I1.0`, `QW4.1`, or word-addressed `IW3`.
static ADDRESS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([IQ]W?\d+\.\d+|[IQ]W\d+)\b").expect("address pattern"));

/// Words followed by dotted number groups, optionally an uppercase tag: `Motor Start 1.2 EN`.
static FUNCTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z][A-Za-z\s]+(?:\d+\.)+\d+(?:\s+[A-Z]+)?)").expect("function pattern")
});

/// Turns flattened page text into address/function records.
///
/// Schematics print a function label once and list several I/O points
/// under it, so the last label seen is carried forward to following
/// address lines that have no label of their own.
#[derive(Debug, Default)]
pub struct RecordParser {
    current_function: String,
}

impl RecordParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Vec<ExtractedRecord> {
        Self::new().feed(text)
    }

    /// Parse `text`, keeping the function context across calls.
    pub fn feed(&mut self, text: &str) -> Vec<ExtractedRecord> {
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        let mut records = Vec::new();

        for line in normalized.split('\n') {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let mut cursor = 0;
            for address in ADDRESS_PATTERN.find_iter(line) {
                self.update_context(&line[cursor..address.start()]);
                records.push(ExtractedRecord::new(
                    address.as_str(),
                    self.current_function.clone(),
                ));
                cursor = address.end();
            }

            if cursor == 0 {
                // No address: a header line that may name the following points.
                self.update_context(line);
            }
        }

        records
    }

    pub fn current_function(&self) -> &str {
        &self.current_function
    }

    fn update_context(&mut self, prefix: &str) {
        let prefix = prefix.trim();

        if let Some(function) = FUNCTION_PATTERN.find(prefix) {
            self.current_function = function.as_str().trim().to_string();
            return;
        }

        // `=` and `:` introduce cross references, not names.
        if prefix.is_empty() || prefix.starts_with('=') || prefix.starts_with(':') {
            return;
        }

        let words: Vec<&str> = prefix
            .split_whitespace()
            .filter(|p| !p.starts_with('=') && !p.starts_with(':'))
            .collect();
        if !words.is_empty() {
            self.current_function = words.join(" ");
        }
    }
}
