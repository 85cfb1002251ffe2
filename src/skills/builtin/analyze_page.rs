//! `analyze_page`: readability analysis of the page the user is reading.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};

use crate::bus::MessageBus;
use crate::error::SkillError;
use crate::memory::truncate_chars;
use crate::skills::skill::Skill;

const DEFAULT_MAX_LENGTH: usize = 50_000;
const PREVIEW_CHARS: usize = 500;

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+(?:['’\-][\p{L}\p{N}]+)*").expect("word pattern is valid"));

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?。！？]+").expect("sentence pattern is valid"));

/// Word and sentence statistics of a text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStats {
    pub word_count: usize,
    pub sentence_count: usize,
    /// Rounded to one decimal.
    pub avg_words_per_sentence: f64,
    /// Unique words as a percentage of all words, rounded to one decimal.
    pub vocabulary: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadabilityLevel {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Readability {
    /// 0 to 100, higher is easier.
    pub score: f64,
    pub level: ReadabilityLevel,
    pub suggestions: Vec<String>,
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub fn text_stats(text: &str) -> TextStats {
    let words: Vec<&str> = WORD.find_iter(text).map(|m| m.as_str()).collect();
    if words.is_empty() {
        return TextStats {
            word_count: 0,
            sentence_count: 0,
            avg_words_per_sentence: 0.0,
            vocabulary: 0.0,
        };
    }

    let sentence_count = SENTENCE_END
        .split(text)
        .filter(|s| WORD.is_match(s))
        .count()
        .max(1);
    let unique: HashSet<String> = words.iter().map(|w| w.to_lowercase()).collect();
    let word_count = words.len();

    TextStats {
        word_count,
        sentence_count,
        avg_words_per_sentence: round1(word_count as f64 / sentence_count as f64),
        vocabulary: round1(unique.len() as f64 / word_count as f64 * 100.0),
    }
}

/// Score starts at 100. Long sentences cost up to 30 points and a high share
/// of long words (over 6 characters) costs 10.
pub fn analyze_readability(text: &str) -> Readability {
    if text.trim().is_empty() {
        return Readability {
            score: 0.0,
            level: ReadabilityLevel::Easy,
            suggestions: vec!["Text is too short to analyze.".to_string()],
        };
    }

    let stats = text_stats(text);
    let mut suggestions = Vec::new();
    let mut score = 100.0;

    if stats.avg_words_per_sentence > 20.0 {
        score -= ((stats.avg_words_per_sentence - 20.0) * 2.0).min(30.0);
        suggestions.push("Sentences are long; splitting them would help readability.".to_string());
    }

    let long_words = text.split_whitespace().filter(|w| w.chars().count() > 6).count();
    let long_word_ratio = if stats.word_count > 0 {
        long_words as f64 / stats.word_count as f64 * 100.0
    } else {
        0.0
    };
    if long_word_ratio > 20.0 {
        score -= 10.0;
        suggestions.push("Many technical terms; consider adding explanations.".to_string());
    }

    let score: f64 = f64::clamp(score, 0.0, 100.0);
    let level = if score >= 70.0 {
        ReadabilityLevel::Easy
    } else if score >= 40.0 {
        ReadabilityLevel::Medium
    } else {
        suggestions.push("Dense material; read it in sections or ask for explanations.".to_string());
        ReadabilityLevel::Hard
    };

    Readability {
        score: round1(score),
        level,
        suggestions,
    }
}

/// Pulls the current page over the message bus and reports its readability.
pub struct AnalyzePageSkill {
    bus: Arc<MessageBus>,
}

impl AnalyzePageSkill {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Skill for AnalyzePageSkill {
    fn name(&self) -> &str {
        "analyze_page"
    }

    fn description(&self) -> &str {
        "Analyze the page the user is currently reading: word and sentence counts, \
         vocabulary diversity, and a readability score with suggestions. \
         Useful for long articles and papers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "maxLength": {
                    "type": "integer",
                    "description": "Maximum characters of page text to analyze",
                    "default": DEFAULT_MAX_LENGTH
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, SkillError> {
        let max_length = args
            .get("maxLength")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_LENGTH);

        let page = match self.bus.request_page_content().await {
            Ok(Some(page)) if !page.content.trim().is_empty() => page,
            Ok(_) => return Ok(json!({"success": false, "error": "No page content available"})),
            Err(e) => {
                return Err(SkillError::ExecutionFailed {
                    name: self.name().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let content = truncate_chars(&page.content, max_length);
        let stats = text_stats(content);
        let readability = analyze_readability(content);

        Ok(json!({
            "success": true,
            "title": page.title,
            "url": page.url,
            "wordCount": stats.word_count,
            "sentenceCount": stats.sentence_count,
            "vocabulary": stats.vocabulary,
            "readability": readability,
            "contentPreview": format!("{}...", truncate_chars(content, PREVIEW_CHARS)),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageType;

    #[test]
    fn stats_count_words_and_sentences() {
        let stats = text_stats("The cat sat. The dog ran! Did it?");
        assert_eq!(stats.word_count, 8);
        assert_eq!(stats.sentence_count, 3);
        assert_eq!(stats.avg_words_per_sentence, 2.7);
        assert_eq!(stats.vocabulary, 87.5);

        let empty = text_stats("   ");
        assert_eq!(empty.word_count, 0);
        assert_eq!(empty.sentence_count, 0);
    }

    #[test]
    fn short_plain_text_is_easy() {
        let r = analyze_readability("The cat sat on the mat. It was warm.");
        assert_eq!(r.score, 100.0);
        assert_eq!(r.level, ReadabilityLevel::Easy);
        assert!(r.suggestions.is_empty());
    }

    #[test]
    fn long_sentences_and_long_words_are_penalized() {
        // One 40-word sentence made of long words: 30 + 10 points off.
        let sentence = vec!["extraordinarily"; 40].join(" ") + ".";
        let r = analyze_readability(&sentence);
        assert_eq!(r.score, 60.0);
        assert_eq!(r.level, ReadabilityLevel::Medium);
        assert_eq!(r.suggestions.len(), 2);
    }

    #[test]
    fn empty_text_scores_zero() {
        let r = analyze_readability("");
        assert_eq!(r.score, 0.0);
        assert_eq!(r.suggestions.len(), 1);
    }

    #[tokio::test]
    async fn execute_reads_page_from_bus() {
        let bus = Arc::new(MessageBus::new());
        let _sub = bus.on_message(MessageType::GetPageContent, |_| async {
            Some(json!({"url": "https://a.com", "title": "A", "content": "Short text. Very short."}))
        });

        let skill = AnalyzePageSkill::new(Arc::clone(&bus));
        let result = skill.execute(json!({})).await.unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["title"], "A");
        assert_eq!(result["wordCount"], 4);
        assert_eq!(result["readability"]["level"], "easy");
    }

    #[tokio::test]
    async fn execute_without_page_reports_failure() {
        let skill = AnalyzePageSkill::new(Arc::new(MessageBus::new()));
        let result = skill.execute(json!({})).await.unwrap();
        assert_eq!(result["success"], false);
    }
}
