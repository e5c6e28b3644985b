//! ANSI 16-color escape codes.

/// Distance between a foreground color code and its background counterpart.
pub const ANSI_BACKGROUND_OFFSET: u8 = 10;

/// Resets the foreground color only.
pub const COLOR_RESET: u8 = 39;

/// Resets the background color only.
pub const BG_COLOR_RESET: u8 = 49;

/// `ESC [ <code> m`
pub fn ansi16(code: u8) -> String {
    format!("\u{1b}[{}m", code)
}

/// An open/close escape pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Style {
    pub open: u8,
    pub close: u8,
}

impl Style {
    pub const fn new(open: u8, close: u8) -> Self {
        Self { open, close }
    }

    pub const fn foreground(code: u8) -> Self {
        Self::new(code, COLOR_RESET)
    }

    pub const fn background(code: u8) -> Self {
        Self::new(code + ANSI_BACKGROUND_OFFSET, BG_COLOR_RESET)
    }

    /// Wrap `text` unconditionally.
    pub fn paint(&self, text: &str) -> String {
        format!("{}{}{}", ansi16(self.open), text, ansi16(self.close))
    }
}
