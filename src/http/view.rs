//! Pluggable template rendering.

use serde_json::Value;

/// Error type view engines report.
pub type RenderError = Box<dyn std::error::Error + Send + Sync>;

/// Turns a named view and its locals into markup.
pub trait ViewEngine: Send + Sync + 'static {
    fn render(&self, view: &str, locals: &Value) -> Result<String, RenderError>;
}

impl<F> ViewEngine for F
where
    F: Fn(&str, &Value) -> Result<String, RenderError> + Send + Sync + 'static,
{
    fn render(&self, view: &str, locals: &Value) -> Result<String, RenderError> {
        self(view, locals)
    }
}
