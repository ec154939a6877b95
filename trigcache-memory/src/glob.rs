//! Redis-style glob matching.

use regex::Regex;

/// Compiles a Redis `MATCH` pattern into an anchored regex.
///
/// Supports `*`, `?`, `[...]` / `[^...]` classes and `\` escapes.
pub(crate) fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                for class_ch in chars.by_ref() {
                    if class_ch == ']' {
                        closed = true;
                        break;
                    }
                    if matches!(class_ch, '\\' | '[' | '&' | '~') {
                        out.push('\\');
                    }
                    out.push(class_ch);
                }
                if !closed {
                    return Err(regex::Error::Syntax(format!(
                        "unterminated character class in `{pattern}`"
                    )));
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out)
}

#[cfg(test)]
mod tests {
    use super::compile;

    #[test]
    fn test_star_and_question() {
        let re = compile("tuk:dev:trig:*").unwrap();
        assert!(re.is_match("tuk:dev:trig:42:v1"));
        assert!(!re.is_match("tuk:prod:trig:42:v1"));

        let re = compile("tuk:dev:trig:?:v1").unwrap();
        assert!(re.is_match("tuk:dev:trig:4:v1"));
        assert!(!re.is_match("tuk:dev:trig:42:v1"));
    }

    #[test]
    fn test_classes_and_escapes() {
        let re = compile("k[ab]").unwrap();
        assert!(re.is_match("ka") && re.is_match("kb") && !re.is_match("kc"));

        let re = compile("k[^ab]").unwrap();
        assert!(re.is_match("kc") && !re.is_match("ka"));

        let re = compile(r"lit\*").unwrap();
        assert!(re.is_match("lit*") && !re.is_match("litx"));

        let re = compile("a.b").unwrap();
        assert!(!re.is_match("axb"));
    }

    #[test]
    fn test_unterminated_class() {
        assert!(compile("k[ab").is_err());
    }
}
