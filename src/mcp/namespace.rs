//! Backend namespacing for aggregated identifiers.
//!
//! Every tool, prompt and resource URI exposed on the aggregate is qualified
//! with the name of the backend that reported it, so that two backends can
//! both expose `echo` without colliding.

/// Separator between backend name and original identifier.
pub const SEPARATOR: &str = ".";

/// Qualify an identifier with a backend name.
///
/// Idempotent: an identifier that already carries `"{backend}."` is returned
/// unchanged rather than being prefixed twice.
pub fn qualify_name(backend: &str, name: &str) -> String {
    if is_qualified(backend, name) {
        name.to_string()
    } else {
        format!("{}{}{}", backend, SEPARATOR, name)
    }
}

/// Whether `name` already starts with the backend's own prefix.
pub fn is_qualified(backend: &str, name: &str) -> bool {
    name.strip_prefix(backend)
        .is_some_and(|rest| rest.starts_with(SEPARATOR))
}
