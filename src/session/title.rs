/// First non-empty quoted substring of `text`, straight or curly quotes
pub fn quoted_title(text: &str) -> Option<String> {
    let mut rest = text;
    while let Some(open) = rest.find(['"', '\u{201C}']) {
        let quote = rest[open..].chars().next()?;
        let close = if quote == '"' { '"' } else { '\u{201D}' };
        let after = &rest[open + quote.len_utf8()..];
        let end = after.find(close)?;
        let title = after[..end].trim();
        if !title.is_empty() {
            return Some(title.to_string());
        }
        rest = &after[end + close.len_utf8()..];
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_title() {
        assert_eq!(
            quoted_title(r#"Please help with "Fix bug""#).as_deref(),
            Some("Fix bug")
        );
        assert_eq!(
            quoted_title("Name it \u{201C}Trip plan\u{201D} please").as_deref(),
            Some("Trip plan")
        );
        assert_eq!(quoted_title(r#"skip "" then "Second""#).as_deref(), Some("Second"));
        assert_eq!(quoted_title("no quotes here"), None);
        assert_eq!(quoted_title(r#"unterminated "quote"#), None);
    }
}
