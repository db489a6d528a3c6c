//! Quote-aware line scanning: `#`-to-end-of-line comment stripping and
//! top-level splitting, both honoring `'…'`/`"…"` quoting so a `#` or
//! `=` inside a quoted Unicode string doesn't get mistaken for syntax
//! (spec.md §6).

/// Strips a trailing `# comment`, ignoring `#` characters inside quotes.
/// Returns the unquoted-aware prefix with trailing whitespace removed.
pub fn strip_comment(line: &str) -> &str {
    let mut in_quote: Option<char> = None;
    let mut escaped = false;
    for (i, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match in_quote {
            Some(q) => {
                if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    in_quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => in_quote = Some(ch),
                '#' => return line[..i].trim_end(),
                _ => {}
            },
        }
    }
    line.trim_end()
}

/// Counts leading whitespace characters (spaces/tabs counted uniformly,
/// one unit each) for indentation tracking.
pub fn leading_indent(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Splits `s` on the first top-level `=` (not inside quotes), returning
/// `(key, value)` with both sides trimmed. `None` if there is no
/// top-level `=`.
pub fn split_once_top_level(s: &str, sep: char) -> Option<(&str, &str)> {
    let mut in_quote: Option<char> = None;
    let mut escaped = false;
    for (i, ch) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match in_quote {
            Some(q) => {
                if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    in_quote = None;
                }
            }
            None => {
                if ch == '\'' || ch == '"' {
                    in_quote = Some(ch);
                } else if ch == sep {
                    return Some((s[..i].trim(), s[i + ch.len_utf8()..].trim()));
                }
            }
        }
    }
    None
}

/// Splits a comma-separated top-level list (e.g. `KEY1,KEY2,KEY3`),
/// honoring quoting the same way. Empty input yields an empty vec.
pub fn split_top_level_list(s: &str, sep: char) -> Vec<String> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut in_quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0usize;
    for (i, ch) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match in_quote {
            Some(q) => {
                if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    in_quote = None;
                }
            }
            None => {
                if ch == '\'' || ch == '"' {
                    in_quote = Some(ch);
                } else if ch == sep {
                    out.push(s[start..i].trim().to_string());
                    start = i + ch.len_utf8();
                }
            }
        }
    }
    out.push(s[start..].trim().to_string());
    out
}

/// Unescapes a quoted Unicode-string action body: `\\ \' \" \b \e \n \t`
/// (spec.md §6). `s` must already have its surrounding quotes stripped.
pub fn unescape(s: &str) -> Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('b') => out.push('\u{0008}'),
            Some('e') => out.push('\u{001B}'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => return Err(format!("unknown escape '\\{other}'")),
            None => return Err("trailing backslash".to_string()),
        }
    }
    Ok(out)
}

/// Strips one layer of matching `'…'`/`"…"` quoting, if present.
pub fn strip_quotes(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'\'' || first == b'"') && first == last {
            return Some(&s[1..s.len() - 1]);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_comment_ignores_hash_in_quotes() {
        assert_eq!(strip_comment("a=\"b#c\" # real comment"), "a=\"b#c\"");
    }

    #[test]
    fn split_once_ignores_equals_in_quotes() {
        assert_eq!(split_once_top_level("a=\"x=y\"", '='), Some(("a", "\"x=y\"")));
    }

    #[test]
    fn unescape_handles_known_escapes() {
        assert_eq!(unescape(r"a\nb\tc").unwrap(), "a\nb\tc");
        assert!(unescape(r"\q").is_err());
    }

    #[test]
    fn split_top_level_list_basic() {
        assert_eq!(split_top_level_list("a,b,c", ','), vec!["a", "b", "c"]);
        assert_eq!(split_top_level_list("", ','), Vec::<String>::new());
    }
}
