//! Terminal geometry

use serde::{Deserialize, Serialize};

/// Terminal dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of columns
    pub cols: u16,
    /// Number of rows
    pub rows: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Default terminal size (80x24)
    pub fn default_size() -> Self {
        Self { cols: 80, rows: 24 }
    }

    /// Component-wise minimum of two sizes.
    ///
    /// This is the reconciliation primitive: the dimensions applied to a
    /// shared PTY are the minimum over every attached viewer, so no viewer
    /// sees lines wrapped for a larger sibling.
    pub fn min(self, other: TerminalSize) -> TerminalSize {
        TerminalSize {
            cols: self.cols.min(other.cols),
            rows: self.rows.min(other.rows),
        }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::default_size()
    }
}

impl std::fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_size_default() {
        let size = TerminalSize::default();
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
    }

    #[test]
    fn test_terminal_size_min_componentwise() {
        let a = TerminalSize::new(80, 40);
        let b = TerminalSize::new(100, 24);
        let min = a.min(b);
        assert_eq!(min.cols, 80);
        assert_eq!(min.rows, 24);
    }

    #[test]
    fn test_terminal_size_display() {
        assert_eq!(format!("{}", TerminalSize::new(120, 30)), "120x30");
    }
}
