//! Parsing of user replies from the text and call channels.

use crate::Outcome;

/// Map an inbound text reply to an outcome
///
/// `N` is deliberately absent: it belongs to the channel-toggle dialogue.
pub fn parse_text_reply(text: &str) -> Option<Outcome> {
    match text.trim().to_uppercase().as_str() {
        "D" | "DONE" | "TAKEN" | "YES" => Some(Outcome::Taken),
        "S" | "SKIP" | "SKIPPED" => Some(Outcome::Skipped),
        _ => None,
    }
}

/// Map keypad digits or recognized speech from an interactive call
///
/// Digits win over speech when both are present.
pub fn parse_call_input(digits: &str, speech: &str) -> Option<Outcome> {
    match digits.trim().chars().next() {
        Some('1') => return Some(Outcome::Taken),
        Some('2') => return Some(Outcome::Skipped),
        _ => {}
    }

    let speech = speech.to_lowercase();
    let words: Vec<&str> = speech
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if words.iter().any(|w| matches!(*w, "taken" | "yes" | "done")) {
        Some(Outcome::Taken)
    } else if words.iter().any(|w| w.starts_with("skip") || *w == "no") {
        Some(Outcome::Skipped)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_replies() {
        assert_eq!(parse_text_reply("d"), Some(Outcome::Taken));
        assert_eq!(parse_text_reply("  Taken "), Some(Outcome::Taken));
        assert_eq!(parse_text_reply("YES"), Some(Outcome::Taken));
        assert_eq!(parse_text_reply("s"), Some(Outcome::Skipped));
        assert_eq!(parse_text_reply("skipped"), Some(Outcome::Skipped));
        assert_eq!(parse_text_reply("N"), None);
        assert_eq!(parse_text_reply("hello"), None);
    }

    #[test]
    fn test_call_digits() {
        assert_eq!(parse_call_input("1", ""), Some(Outcome::Taken));
        assert_eq!(parse_call_input("2#", ""), Some(Outcome::Skipped));
        assert_eq!(parse_call_input("9", ""), None);
    }

    #[test]
    fn test_call_speech() {
        assert_eq!(parse_call_input("", "Yes I have"), Some(Outcome::Taken));
        assert_eq!(parse_call_input("", "I'll skip it"), Some(Outcome::Skipped));
        assert_eq!(parse_call_input("", "no"), Some(Outcome::Skipped));
        assert_eq!(parse_call_input("", "nothing"), None);
        assert_eq!(parse_call_input("2", "taken"), Some(Outcome::Skipped));
    }
}
