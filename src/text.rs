//! Stateless text transforms: trigger detection, mention rewriting,
//! probability sampling, and response validation.

use crate::MemberProfile;
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Longest prefix a user may ask the agent to prepend to its messages.
pub const MAX_PREFIX_CHARS: usize = 100;

/// Platform limit on outbound message length.
pub const MAX_REPLY_CHARS: usize = 2000;

static PING_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\*ping\*").unwrap()
});

static REFUSAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(I'm sorry|I can't help with|Unfortunately, I cannot|Regrettably, I must decline|I cannot)\b",
    )
    .unwrap()
});

static REACTION_GLYPH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\w\s]{1,2}$").unwrap()
});

static PERSONA_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?):\s*(.*)$").unwrap()
});

/// Case-insensitive whole-word match against a trigger list.
pub fn contains_trigger_word(content: &str, words: &[String]) -> bool {
    if words.is_empty() {
        return false;
    }
    let alternatives = words
        .iter()
        .map(|word| regex::escape(word))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = Regex::new(&format!(r"(?i)\b({alternatives})\b")).unwrap();
    pattern.is_match(content)
}

/// Uniform random draw against `probability`.
pub fn sample(probability: f64) -> bool {
    rand::random::<f64>() < probability
}

/// A prefix is valid when it fits within the persisted length bound.
pub fn is_valid_prefix(prefix: &str) -> bool {
    prefix.chars().count() <= MAX_PREFIX_CHARS
}

/// Whether the model declined to answer rather than producing content.
pub fn is_refusal(text: &str) -> bool {
    REFUSAL.is_match(text)
}

/// Whether a classification response looks like an emoji glyph:
/// one or two non-word, non-space characters and nothing else.
pub fn is_reaction_glyph(text: &str) -> bool {
    REACTION_GLYPH.is_match(text)
}

/// Detect a leading `"Name: body"` persona label on a single-line response.
///
/// Models occasionally echo the speaker label from the transcript; callers
/// keep only the body. Multi-line responses never match.
pub fn split_persona_label(text: &str) -> Option<(&str, &str)> {
    let captures = PERSONA_LABEL.captures(text)?;
    Some((
        captures.get(1)?.as_str(),
        captures.get(2)?.as_str(),
    ))
}

/// Replace member display names and usernames with mention tokens.
///
/// Longest name first, so a name that is a prefix of another ("Al" vs
/// "Alex") never steals the match. Case-insensitive, whole-word, with an
/// optional leading `@`. When two members share a name, the first
/// registration wins.
pub fn replace_member_names(content: &str, members: &[MemberProfile]) -> String {
    let mut name_to_mention: Vec<(&str, String)> = Vec::new();
    let mut seen = HashSet::new();
    for member in members {
        for name in [member.display_name.as_str(), member.username.as_str()] {
            if name.trim().is_empty() {
                continue;
            }
            if seen.insert(name) {
                name_to_mention.push((name, member.mention()));
            }
        }
    }
    name_to_mention.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut content = content.to_string();
    for (name, mention) in &name_to_mention {
        let pattern = Regex::new(&format!(r"(?i)\b@?{}\b", regex::escape(name))).unwrap();
        content = pattern
            .replace_all(&content, |_: &Captures<'_>| mention.clone())
            .into_owned();
    }
    content
}

/// Replace every literal `*ping*` token with the given mention.
pub fn replace_ping_token(content: &str, mention: &str) -> String {
    PING_TOKEN
        .replace_all(content, |_: &Captures<'_>| mention.to_string())
        .into_owned()
}

/// Replace `"Name!"` / `"Name?"` (at start of string or after whitespace)
/// with the user's mention followed by the same punctuation.
pub fn replace_name_exclamation(content: &str, display_name: &str, mention: &str) -> String {
    let pattern =
        Regex::new(&format!(r"(?i)(^|\s)({})([!?]+)", regex::escape(display_name))).unwrap();
    pattern
        .replace_all(content, |captures: &Captures<'_>| {
            format!("{}{}{}", &captures[1], mention, &captures[3])
        })
        .into_owned()
}

/// Truncate to the platform limit, marking the cut with an ellipsis.
pub fn truncate_reply(text: &str) -> String {
    if text.chars().count() <= MAX_REPLY_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MAX_REPLY_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(user_id: u64, display_name: &str, username: &str) -> MemberProfile {
        MemberProfile {
            user_id,
            display_name: display_name.to_string(),
            username: username.to_string(),
        }
    }

    #[test]
    fn test_trigger_word_matches_whole_words_case_insensitively() {
        let words = vec!["sydney".to_string(), "syd".to_string()];
        assert!(contains_trigger_word("hey Sydney, you there?", &words));
        assert!(contains_trigger_word("SYD!", &words));
        assert!(!contains_trigger_word("sydneys are plural", &words));
        assert!(!contains_trigger_word("nothing here", &words));
    }

    #[test]
    fn test_trigger_word_handles_punctuated_words() {
        let words = vec!["s!talk".to_string(), "sydneybot#3817".to_string()];
        assert!(contains_trigger_word("try s!talk now", &words));
        assert!(contains_trigger_word("ping sydneybot#3817 please", &words));
    }

    #[test]
    fn test_sample_boundaries_are_deterministic() {
        for _ in 0..1000 {
            assert!(!sample(0.0));
            assert!(sample(1.0));
        }
    }

    #[test]
    fn test_prefix_length_boundary() {
        assert!(is_valid_prefix(&"x".repeat(100)));
        assert!(!is_valid_prefix(&"x".repeat(101)));
    }

    #[test]
    fn test_refusal_detection() {
        assert!(is_refusal("I'm sorry, but no."));
        assert!(is_refusal("unfortunately, I cannot do that"));
        assert!(is_refusal("I cannot help here"));
        assert!(!is_refusal("Sure, here you go!"));
    }

    #[test]
    fn test_reaction_glyph_shape() {
        assert!(is_reaction_glyph("!!"));
        assert!(is_reaction_glyph("😶"));
        assert!(!is_reaction_glyph("ok"));
        assert!(!is_reaction_glyph(""));
        assert!(!is_reaction_glyph("a!"));
        assert!(!is_reaction_glyph("! !"));
    }

    #[test]
    fn test_persona_label_split() {
        assert_eq!(
            split_persona_label("Sydney: hello there"),
            Some(("Sydney", "hello there"))
        );
        assert_eq!(split_persona_label("no label here"), None);
        // Multi-line responses are left alone.
        assert_eq!(split_persona_label("Sydney: hi\nthere"), None);
    }

    #[test]
    fn test_member_substitution_prefers_longest_name() {
        let members = vec![member(1, "Al", "al"), member(2, "Alex", "alexr")];
        assert_eq!(replace_member_names("Alex was here", &members), "<@2> was here");
        assert_eq!(replace_member_names("Al was here", &members), "<@1> was here");
    }

    #[test]
    fn test_member_substitution_is_case_insensitive_and_word_bounded() {
        let members = vec![member(9, "Rook", "rook")];
        assert_eq!(replace_member_names("hey rook!", &members), "hey <@9>!");
        assert_eq!(replace_member_names("rookie move", &members), "rookie move");
    }

    #[test]
    fn test_member_substitution_is_idempotent() {
        let members = vec![member(1, "Al", "al"), member(2, "Alex", "alexr")];
        let once = replace_member_names("Alex and Al talked", &members);
        let twice = replace_member_names(&once, &members);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_ping_token_replacement() {
        assert_eq!(
            replace_ping_token("hello *ping* and *PING*", "<@5>"),
            "hello <@5> and <@5>"
        );
    }

    #[test]
    fn test_name_exclamation_replacement() {
        assert_eq!(
            replace_name_exclamation("Anon! welcome", "Anon", "<@5>"),
            "<@5>! welcome"
        );
        assert_eq!(
            replace_name_exclamation("oh anon?! really", "Anon", "<@5>"),
            "oh <@5>?! really"
        );
        // Mid-word occurrences are left alone.
        assert_eq!(
            replace_name_exclamation("canon! fire", "Anon", "<@5>"),
            "canon! fire"
        );
    }

    #[test]
    fn test_truncation_at_platform_limit() {
        let long = "a".repeat(2050);
        let truncated = truncate_reply(&long);
        assert_eq!(truncated.chars().count(), 2000);
        assert!(truncated.ends_with("..."));

        let short = "a".repeat(2000);
        assert_eq!(truncate_reply(&short), short);
    }
}
