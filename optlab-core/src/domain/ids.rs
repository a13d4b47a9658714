//! Run identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a single optimize/retest/screen run.
///
/// Content-addressed: the BLAKE3 hash of a caller-supplied label, so the same
/// label always yields the same seeds downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId([u8; 32]);

impl RunId {
    pub fn from_label(label: &str) -> Self {
        Self(*blake3::hash(label.as_bytes()).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_label_same_id() {
        assert_eq!(RunId::from_label("SPY:neutral:10"), RunId::from_label("SPY:neutral:10"));
        assert_ne!(RunId::from_label("SPY:neutral:10"), RunId::from_label("SPY:neutral:11"));
    }

    #[test]
    fn display_is_short_hex() {
        let id = RunId::from_label("x");
        assert_eq!(id.to_string().len(), 16);
    }
}
