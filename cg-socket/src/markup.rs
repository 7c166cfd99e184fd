//! Markup removal for output text.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Any angle-bracketed tag, opening or closing.
    static ref TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
}

/// Remove every `<...>` tag, keeping the text between tags.
pub fn strip_markup(text: &str) -> String {
    TAG.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tags() {
        assert_eq!(strip_markup("<b>Hello</b> <i>world</i>"), "Hello world");
        assert_eq!(strip_markup("<speak>Hi<break time=\"1s\"/>there</speak>"), "Hithere");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(strip_markup("2 > 1 and 1 < 2"), "2 > 1 and 1 < 2");
        assert_eq!(strip_markup(""), "");
    }
}
