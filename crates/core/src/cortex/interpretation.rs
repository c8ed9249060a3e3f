//! L2 Interpretation: entity extraction, intent classification, sentiment,
//! and capability recommendation.  Pure — no model call.

use std::collections::HashSet;

use regex::Regex;

use crate::schema::{IntentKind, Sentiment};

#[derive(Debug, Clone, Default)]
pub struct Interpretation {
    pub urls: Vec<String>,
    pub file_paths: Vec<String>,
    pub numbers: Vec<String>,
    pub quoted_strings: Vec<String>,
    /// Application name for `open X` style commands.
    pub app_name: Option<String>,
    /// Semantic paths resolved from the world model, `(path, purpose)`.
    pub resolved_paths: Vec<(String, String)>,
    pub intent: IntentKind,
    pub sentiment: Sentiment,
    pub recommended_capabilities: Vec<&'static str>,
}

const MEDIA_KEYWORDS: &[&str] = &[
    "play", "pause", "resume", "skip", "next", "previous", "mute", "unmute", "volume",
];
const COMMAND_KEYWORDS: &[&str] = &["open", "launch", "start", "run", "execute", "close", "kill", "stop"];
const QUESTION_KEYWORDS: &[&str] = &[
    "what", "who", "where", "when", "why", "how", "which", "is", "are", "can", "do", "does",
];
const CODE_KEYWORDS: &[&str] = &[
    "code", "function", "class", "debug", "fix", "implement", "write", "create", "build", "compile",
];
const RESEARCH_KEYWORDS: &[&str] = &["search", "find", "google", "research"];
const CORRECTION_KEYWORDS: &[&str] = &["wrong", "incorrect", "correction", "mistake", "error", "actually"];

pub fn interpret(input: &str, semantic_paths: &[(String, String)]) -> Interpretation {
    let lower = input.to_lowercase();
    let words: HashSet<&str> = lower.split_whitespace().collect();

    let urls = capture_all(r#"https?://[^\s<>"]+"#, input);
    // Path extraction runs over the input with URLs blanked out so a URL's
    // own slashes never read as filesystem paths.
    let mut without_urls = input.to_string();
    for url in &urls {
        without_urls = without_urls.replace(url.as_str(), "");
    }
    let file_paths = capture_all(r#"(?:[A-Za-z]:\\|\.?/)[^\s<>"]+\.\w{1,5}"#, &without_urls);
    let numbers = capture_all(r"\b\d+\.?\d*\b", input);
    let mut quoted_strings = capture_group(r#""([^"]*)""#, input);
    quoted_strings.extend(capture_group(r"'([^']*)'", input));

    let app_name = Regex::new(r"^(?:open|launch|start|run)\s+(.+)$")
        .ok()
        .and_then(|re| re.captures(lower.trim()))
        .map(|c| c[1].trim().to_string());

    // World-model cross-reference: resolve purposes mentioned by name.
    let resolved_paths: Vec<(String, String)> = semantic_paths
        .iter()
        .filter(|(path, purpose)| {
            lower.contains(&purpose.to_lowercase())
                || std::path::Path::new(path)
                    .file_name()
                    .map(|n| lower.contains(&n.to_string_lossy().to_lowercase()))
                    .unwrap_or(false)
        })
        .cloned()
        .collect();

    let intent = classify_intent(&words, input, &urls);
    let sentiment = detect_sentiment(input, &words);

    Interpretation {
        urls,
        file_paths,
        numbers,
        quoted_strings,
        app_name,
        resolved_paths,
        intent,
        sentiment,
        recommended_capabilities: capabilities_for(intent),
    }
}

fn capture_all(pattern: &str, input: &str) -> Vec<String> {
    Regex::new(pattern)
        .map(|re| re.find_iter(input).map(|m| m.as_str().to_string()).collect())
        .unwrap_or_default()
}

fn capture_group(pattern: &str, input: &str) -> Vec<String> {
    Regex::new(pattern)
        .map(|re| {
            re.captures_iter(input)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn classify_intent(words: &HashSet<&str>, raw: &str, urls: &[String]) -> IntentKind {
    let lower = raw.to_lowercase();
    if MEDIA_KEYWORDS.iter().any(|k| words.contains(k)) {
        return IntentKind::MediaControl;
    }
    if COMMAND_KEYWORDS.iter().any(|k| words.contains(k)) {
        return IntentKind::SystemCommand;
    }
    if CODE_KEYWORDS.iter().any(|k| words.contains(k)) {
        return IntentKind::Coding;
    }
    if CORRECTION_KEYWORDS.iter().any(|k| words.contains(k))
        && (lower.contains("previous") || lower.contains("wrong") || lower.contains("not"))
    {
        return IntentKind::Correction;
    }
    if RESEARCH_KEYWORDS.iter().any(|k| words.contains(k))
        || lower.contains("look up")
        || lower.contains("tell me about")
        || !urls.is_empty()
    {
        return IntentKind::Research;
    }
    if raw.trim_end().ends_with('?')
        || (QUESTION_KEYWORDS.iter().any(|k| words.contains(k)) && words.len() < 20)
    {
        return IntentKind::Question;
    }
    IntentKind::Conversation
}

fn detect_sentiment(raw: &str, words: &HashSet<&str>) -> Sentiment {
    let urgent = ["urgent", "asap", "now", "immediately", "hurry", "quick", "fast"];
    let frustrated = ["again", "still", "broken", "wrong", "failed"];
    let lower = raw.to_lowercase();

    if urgent.iter().any(|k| words.contains(k)) || raw.ends_with("!!") {
        return Sentiment::Urgent;
    }
    if frustrated.iter().any(|k| words.contains(k))
        || lower.contains("not working")
        || lower.contains("doesn't work")
    {
        return Sentiment::Frustrated;
    }
    if raw.trim_end().ends_with('?') {
        return Sentiment::Curious;
    }
    Sentiment::Neutral
}

fn capabilities_for(intent: IntentKind) -> Vec<&'static str> {
    match intent {
        IntentKind::MediaControl | IntentKind::SystemCommand => vec!["fast_response"],
        IntentKind::Coding => vec!["coding", "reasoning"],
        IntentKind::Research => vec!["researching", "reasoning"],
        IntentKind::Question => vec!["reasoning", "general"],
        IntentKind::Conversation => vec!["general", "chatter"],
        IntentKind::Correction => vec!["reasoning"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interp(input: &str) -> Interpretation {
        interpret(input, &[])
    }

    #[test]
    fn extracts_urls_paths_and_quotes() {
        let i = interp(r#"read https://example.com/page and ./src/main.rs then say "done""#);
        assert_eq!(i.urls, vec!["https://example.com/page"]);
        assert_eq!(i.file_paths, vec!["./src/main.rs"]);
        assert_eq!(i.quoted_strings, vec!["done"]);
    }

    #[test]
    fn classifies_media_and_commands() {
        assert_eq!(interp("pause the music").intent, IntentKind::MediaControl);
        assert_eq!(interp("open notepad").intent, IntentKind::SystemCommand);
        assert_eq!(interp("open notepad").app_name.as_deref(), Some("notepad"));
    }

    #[test]
    fn classifies_questions_and_research() {
        assert_eq!(interp("what is the capital of france?").intent, IntentKind::Question);
        assert_eq!(interp("search for rust news").intent, IntentKind::Research);
        assert_eq!(interp("summarize https://example.com").intent, IntentKind::Research);
    }

    #[test]
    fn classifies_corrections() {
        assert_eq!(interp("that was wrong, the file is elsewhere").intent, IntentKind::Correction);
    }

    #[test]
    fn sentiment_detection() {
        assert_eq!(interp("do it now!!").sentiment, Sentiment::Urgent);
        assert_eq!(interp("this is still broken").sentiment, Sentiment::Frustrated);
        assert_eq!(interp("how does this work?").sentiment, Sentiment::Curious);
        assert_eq!(interp("hello there").sentiment, Sentiment::Neutral);
    }

    #[test]
    fn resolves_semantic_paths_by_purpose() {
        let paths = vec![(
            "/home/u/projects/garden".to_string(),
            "garden tracker".to_string(),
        )];
        let i = interpret("update the garden tracker notes", &paths);
        assert_eq!(i.resolved_paths.len(), 1);
    }

    #[test]
    fn capabilities_follow_intent() {
        assert_eq!(interp("pause").recommended_capabilities, vec!["fast_response"]);
        assert!(interp("fix this code").recommended_capabilities.contains(&"coding"));
    }
}
