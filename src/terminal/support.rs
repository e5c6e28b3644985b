//! Terminal color capability detection.
//!
//! Whether stdout is a terminal at all is left to `console`; the color depth
//! is read from an [`EnvSnapshot`].

use console::Term;

use crate::config::env::EnvSnapshot;

/// How many colors the output target understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ColorLevel {
    #[default]
    None = 0,
    Basic = 1,
    Ansi256 = 2,
    TrueColor = 3,
}

impl ColorLevel {
    /// Probe stdout, reading variables from `env` only.
    pub fn detect_stdout(env: &EnvSnapshot) -> Self {
        Self::detect(env, Term::stdout().is_term())
    }

    /// Probe from an explicit environment and TTY flag.
    pub fn detect(env: &EnvSnapshot, is_tty: bool) -> Self {
        let forced = env.get("FORCE_COLOR").map(|v| match v.trim() {
            "false" | "0" => ColorLevel::None,
            "2" => ColorLevel::Ansi256,
            "3" => ColorLevel::TrueColor,
            _ => ColorLevel::Basic,
        });

        match forced {
            Some(ColorLevel::None) => ColorLevel::None,
            Some(min) => Self::depth(env).max(min),
            None if !is_tty || env.get("NO_COLOR").is_some_and(|v| !v.is_empty()) => {
                ColorLevel::None
            }
            None => Self::depth(env),
        }
    }

    /// Color depth advertised by `TERM`, `COLORTERM` and `CI`.
    fn depth(env: &EnvSnapshot) -> Self {
        let term = env.get("TERM").unwrap_or_default();
        if term == "dumb" {
            ColorLevel::None
        } else if env.get("CI").is_some() {
            ColorLevel::Basic
        } else if matches!(env.get("COLORTERM"), Some("truecolor") | Some("24bit")) {
            ColorLevel::TrueColor
        } else if term.contains("256") {
            ColorLevel::Ansi256
        } else if ["screen", "xterm", "vt100", "vt220", "rxvt"]
            .iter()
            .any(|p| term.starts_with(p))
            || ["color", "ansi", "cygwin", "linux"].iter().any(|p| term.contains(p))
            || env.get("COLORTERM").is_some()
            || cfg!(windows)
        {
            ColorLevel::Basic
        } else {
            ColorLevel::None
        }
    }

    pub fn has_color(self) -> bool {
        self > ColorLevel::None
    }
}
