//! Terminal text styling.
//!
//! Every style is a pure string transform: the input is wrapped in an ANSI
//! open/close pair, or returned unchanged when the output target reports no
//! color support.
//!
//! ```
//! use serverkit::terminal::{ColorLevel, Terminal};
//!
//! let plain = Terminal::new(ColorLevel::None);
//! assert_eq!(plain.bold("x"), "x");
//!
//! let color = Terminal::new(ColorLevel::Basic);
//! assert_eq!(color.bold("x"), "\u{1b}[1mx\u{1b}[22m");
//! ```

pub mod styles;
pub mod support;

use std::str::FromStr;

use crate::config::env::EnvSnapshot;

pub use styles::Style;
pub use support::ColorLevel;

/// Style name that is neither a modifier nor a (background) color.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown style: {0}")]
pub struct UnknownStyle(pub String);

/// Applies styles according to a color capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminal {
    level: ColorLevel,
}

impl Terminal {
    pub const fn new(level: ColorLevel) -> Self {
        Self { level }
    }

    /// Styler for stdout under the variables in `env`.
    pub fn for_stdout(env: &EnvSnapshot) -> Self {
        Self::new(ColorLevel::detect_stdout(env))
    }

    pub fn level(&self) -> ColorLevel {
        self.level
    }

    /// Wrap `text` in `style`, or return it as-is without color support.
    pub fn apply(&self, style: Style, text: &str) -> String {
        if !self.level.has_color() {
            return text.to_string();
        }
        style.paint(text)
    }

    /// Apply a style by name.
    pub fn apply_named(&self, name: &str, text: &str) -> Result<String, UnknownStyle> {
        Ok(self.apply(name.parse()?, text))
    }
}

macro_rules! modifiers {
    ($($method:ident, $name:literal => ($open:expr, $close:expr)),* $(,)?) => {
        impl Terminal {
            $(
                pub fn $method(&self, text: &str) -> String {
                    self.apply(Style::new($open, $close), text)
                }
            )*
        }

        fn modifier_by_name(name: &str) -> Option<Style> {
            match name {
                $($name => Some(Style::new($open, $close)),)*
                _ => None,
            }
        }
    };
}

macro_rules! colors {
    ($($method:ident, $bg:ident, $name:literal => $code:expr),* $(,)?) => {
        impl Terminal {
            $(
                pub fn $method(&self, text: &str) -> String {
                    self.apply(Style::foreground($code), text)
                }

                pub fn $bg(&self, text: &str) -> String {
                    self.apply(Style::background($code), text)
                }
            )*
        }

        fn color_by_name(name: &str) -> Option<u8> {
            match name {
                $($name => Some($code),)*
                _ => None,
            }
        }
    };
}

modifiers! {
    reset, "reset" => (0, 0),
    bold, "bold" => (1, 22),
    dim, "dim" => (2, 22),
    italic, "italic" => (3, 23),
    underline, "underline" => (4, 24),
    overline, "overline" => (53, 55),
    inverse, "inverse" => (7, 27),
    hidden, "hidden" => (8, 28),
    strikethrough, "strikethrough" => (9, 29),
}

colors! {
    black, black_bg, "black" => 30,
    red, red_bg, "red" => 31,
    green, green_bg, "green" => 32,
    yellow, yellow_bg, "yellow" => 33,
    blue, blue_bg, "blue" => 34,
    magenta, magenta_bg, "magenta" => 35,
    cyan, cyan_bg, "cyan" => 36,
    white, white_bg, "white" => 37,
    gray, gray_bg, "gray" => 90,
    black_bright, black_bright_bg, "blackBright" => 90,
    red_bright, red_bright_bg, "redBright" => 91,
    green_bright, green_bright_bg, "greenBright" => 92,
    yellow_bright, yellow_bright_bg, "yellowBright" => 93,
    blue_bright, blue_bright_bg, "blueBright" => 94,
    magenta_bright, magenta_bright_bg, "magentaBright" => 95,
    cyan_bright, cyan_bright_bg, "cyanBright" => 96,
    white_bright, white_bright_bg, "whiteBright" => 97,
}

impl FromStr for Style {
    type Err = UnknownStyle;

    /// Accepts modifier names, color names and `<color>Bg`.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if let Some(style) = modifier_by_name(name) {
            return Ok(style);
        }
        if let Some(code) = color_by_name(name) {
            return Ok(Style::foreground(code));
        }
        name.strip_suffix("Bg")
            .and_then(color_by_name)
            .map(Style::background)
            .ok_or_else(|| UnknownStyle(name.to_string()))
    }
}
