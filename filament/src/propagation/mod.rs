//! Carrier and codec interfaces for cross-process context propagation.
//!
//! Trace context travels between processes in out-of-band channels such as
//! HTTP headers. A [`TextMapPropagator`] converts between a [`Context`] and
//! string key/value pairs in both directions; [`Injector`] and [`Extractor`]
//! abstract over the concrete carrier (a header map, a `HashMap`, ...).
//!
//! Propagation is best-effort: decoding tolerates partial, missing and
//! malformed fields by degrading to "no context" — it must never fail the
//! surrounding application operation.

use crate::Context;
use std::collections::HashMap;
use thiserror::Error;

/// Adds entries to a carrier of string key/value pairs.
pub trait Injector {
    /// Sets a key/value pair on the carrier.
    fn set(&mut self, key: &str, value: String);
}

/// Reads entries from a carrier of string key/value pairs.
pub trait Extractor {
    /// Gets the value for a key, if present.
    fn get(&self, key: &str) -> Option<&str>;

    /// Lists all keys present in the carrier.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Keys are lowercased, matching case-insensitive header semantics.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(|v| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.keys().map(|k| k.as_str()).collect()
    }
}

/// Converts a context to and from its carrier representation.
///
/// Encoding and decoding are pure functions of the carrier content; a
/// propagator holds no per-call state.
pub trait TextMapPropagator: std::fmt::Debug {
    /// Encodes the trace identity of `cx` into the carrier.
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector);

    /// Encodes the currently active context into the carrier.
    fn inject(&self, injector: &mut dyn Injector) {
        Context::map_current(|cx| self.inject_context(cx, injector))
    }

    /// Decodes a trace identity from the carrier, extending `cx` with it.
    ///
    /// Returns `cx` unchanged when the carrier holds nothing usable.
    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context;

    /// Decodes a trace identity from the carrier, extending the currently
    /// active context.
    fn extract(&self, extractor: &dyn Extractor) -> Context {
        self.extract_with_context(&Context::current(), extractor)
    }

    /// The carrier keys this propagator reads and writes.
    fn fields(&self) -> FieldIter<'_>;
}

/// Iterator over the carrier keys of a propagator.
#[derive(Debug)]
pub struct FieldIter<'a>(std::slice::Iter<'a, String>);

impl<'a> FieldIter<'a> {
    /// Creates an iterator over the given fields.
    pub fn new(fields: &'a [String]) -> Self {
        FieldIter(fields.iter())
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|field| field.as_str())
    }
}

/// Error raised while encoding or decoding a carrier.
///
/// Propagation errors are diagnostic only; they are logged by the codec and
/// never surfaced to the instrumented operation.
#[derive(Error, Debug)]
#[error("{operation} failed in {propagator}: {message}")]
pub struct PropagationError {
    message: &'static str,
    operation: &'static str,
    propagator: &'static str,
}

impl PropagationError {
    /// An error raised while decoding a carrier.
    pub fn extract(message: &'static str, propagator: &'static str) -> Self {
        PropagationError {
            message,
            operation: "extract",
            propagator,
        }
    }

    /// An error raised while encoding into a carrier.
    pub fn inject(message: &'static str, propagator: &'static str) -> Self {
        PropagationError {
            message,
            operation: "inject",
            propagator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_carrier_is_case_insensitive() {
        let mut carrier = HashMap::new();
        Injector::set(&mut carrier, "Header-Name", "value".to_string());

        assert_eq!(Extractor::get(&carrier, "HEADER-NAME"), Some("value"));
        assert_eq!(Extractor::get(&carrier, "header-name"), Some("value"));
        assert_eq!(Extractor::get(&carrier, "missing"), None);
    }

    #[test]
    fn hash_map_keys_are_lowercased() {
        let mut carrier = HashMap::new();
        Injector::set(&mut carrier, "Header-One", "1".to_string());
        Injector::set(&mut carrier, "header-two", "2".to_string());

        let keys = Extractor::keys(&carrier);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"header-one"));
        assert!(keys.contains(&"header-two"));
    }
}
