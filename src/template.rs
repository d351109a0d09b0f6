/// Substitute `{key}` placeholders in `text` using `lookup`.
///
/// Only identifier-shaped keys (`[a-z_][a-z0-9_]*`) are placeholders; any other
/// brace content such as `{3}` is copied through untouched. Returns the first
/// key `lookup` could not resolve as the error.
pub fn render<F>(text: &str, lookup: F) -> Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder_key(&after[..close]) => {
                let key = &after[..close];
                let value = lookup(key).ok_or_else(|| key.to_string())?;
                out.push_str(&value);
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn is_placeholder_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(key: &str) -> Option<String> {
        match key {
            "name" => Some("Kim".to_string()),
            "time" => Some("18:30".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_render_substitutes_known_keys() {
        let text = render("Hi {name}, see you at {time}.", lookup).unwrap();
        assert_eq!(text, "Hi Kim, see you at 18:30.");
    }

    #[test]
    fn test_render_leaves_non_identifier_braces() {
        assert_eq!(render(r"\d{3}-{name}", lookup).unwrap(), r"\d{3}-Kim");
        assert_eq!(render("open { brace", lookup).unwrap(), "open { brace");
        assert_eq!(render("{}", lookup).unwrap(), "{}");
    }

    #[test]
    fn test_render_reports_missing_key() {
        assert_eq!(render("{name} {table}", lookup).unwrap_err(), "table");
    }
}
