//! Protocol-provided message-type matching (spec §4.5, §4.8).
//!
//! Default protocols match `messageType` by plain equality. HTTP-shaped
//! protocols instead want path templates (`/users/{id}` or `/users/:id`
//! matching `/users/123`) concatenated with a method, which is exposed
//! through [`path_template_matcher`] — a canonical
//! [`SyncProtocol::create_message_type_matcher`](crate::protocol::SyncProtocol::create_message_type_matcher)
//! implementation that HTTP-like adapters can reuse as-is.

use regex::Regex;

/// Build a predicate matching `actual` message types against a `template`
/// like `"GET /users/{id}"` or `"GET /users/:id"`.
///
/// Both brace (`{id}`) and colon (`:id`) placeholder syntaxes are accepted;
/// a placeholder matches one non-`/` path segment.
pub fn path_template_matcher(template: &str) -> impl Fn(&str) -> bool {
    let pattern = template_to_regex(template);
    let regex = Regex::new(&pattern).unwrap_or_else(|_| Regex::new("$^").expect("empty regex"));
    move |actual: &str| regex.is_match(actual)
}

fn template_to_regex(template: &str) -> String {
    let mut out = String::from("^");
    for segment in template.split_inclusive(|c: char| c.is_whitespace() || c == '/') {
        let (body, sep) = split_trailing_sep(segment);
        out.push_str(&segment_to_pattern(body));
        out.push_str(&regex::escape(sep));
    }
    out.push('$');
    out
}

fn split_trailing_sep(segment: &str) -> (&str, &str) {
    match segment.chars().last() {
        Some(c) if c == '/' || c.is_whitespace() => segment.split_at(segment.len() - c.len_utf8()),
        _ => (segment, ""),
    }
}

fn segment_to_pattern(body: &str) -> String {
    if (body.starts_with('{') && body.ends_with('}')) || body.starts_with(':') {
        "[^/]+".to_string()
    } else {
        regex::escape(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brace_template_matches_concrete_path() {
        let m = path_template_matcher("GET /users/{id}");
        assert!(m("GET /users/123"));
        assert!(!m("GET /users/123/posts"));
        assert!(!m("POST /users/123"));
    }

    #[test]
    fn colon_template_matches_concrete_path() {
        let m = path_template_matcher("GET /users/:id");
        assert!(m("GET /users/abc"));
        assert!(!m("GET /users"));
    }

    #[test]
    fn literal_template_is_exact() {
        let m = path_template_matcher("GET /health");
        assert!(m("GET /health"));
        assert!(!m("GET /healthz"));
    }
}
