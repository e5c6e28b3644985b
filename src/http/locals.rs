//! Per-request render locals.
//!
//! Middleware deposits values here (the CSRF layer stores `xsrfToken`);
//! handlers read them back through the [`Locals`] extractor and pass them
//! on to [`App::render`](crate::http::App::render).

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, Extensions},
};
use serde_json::{Map, Value};
use std::convert::Infallible;

/// Values exposed to templates for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Locals(Map<String, Value>);

impl Locals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Set `key` on the request's locals, creating them on first use.
    pub fn insert_into(extensions: &mut Extensions, key: &str, value: impl Into<Value>) {
        match extensions.get_mut::<Locals>() {
            Some(locals) => locals.insert(key, value),
            None => {
                let mut locals = Locals::new();
                locals.insert(key, value);
                extensions.insert(locals);
            }
        }
    }

    /// Overlay `other` on top of these values.
    pub fn merge(&mut self, other: &Locals) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Locals {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<S> FromRequestParts<S> for Locals
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Locals>().cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_into_creates_then_updates() {
        let mut extensions = Extensions::new();
        Locals::insert_into(&mut extensions, "a", 1);
        Locals::insert_into(&mut extensions, "b", "two");
        Locals::insert_into(&mut extensions, "a", 3);

        let locals = extensions.get::<Locals>().unwrap();
        assert_eq!(locals.get("a"), Some(&json!(3)));
        assert_eq!(locals.get("b"), Some(&json!("two")));
    }

    #[test]
    fn test_merge_overrides() {
        let mut base = Locals::new();
        base.insert("title", "App");
        base.insert("keep", true);
        let mut call = Locals::new();
        call.insert("title", "Page");

        base.merge(&call);
        assert_eq!(base.into_value(), json!({"title": "Page", "keep": true}));
    }
}
