//! Non-fatal warnings collected during certificate generation.
//!
//! Entropy shortfalls, a missing IDN conversion library, and seed-file write
//! failures do not abort generation. They are recorded here, emitted as
//! `tracing` warnings as they happen, and returned to the caller alongside
//! the successful result.

use std::fmt;

/// Ordered collection of warning lines from one generation run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning and emit it on the log as it happens.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.entries.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warn_accumulates_in_order() {
        let mut diag = Diagnostics::new();
        assert!(diag.is_empty());

        diag.warn("first");
        diag.warn(String::from("second"));

        assert_eq!(diag.len(), 2);
        assert_eq!(diag.entries(), ["first", "second"]);
    }

    #[test]
    fn test_display_joins_lines() {
        let mut diag = Diagnostics::new();
        diag.warn("one");
        diag.warn("two");
        assert_eq!(diag.to_string(), "one\ntwo");
    }
}
