//! Degraded output for unavailable backends.
//!
//! # Responsibilities
//! - Produce a safe substitute result per backend type
//! - Always surface crisis resources on conversational fallbacks
//! - Never invent content attributed to the user
//!
//! # Design Decisions
//! - Speech-to-text fallbacks carry no transcript, only a request to type instead
//! - Text-to-speech placeholders are explicitly marked as not synthesized
//! - Candidate strategies are tried in configured order; the first one able to
//!   handle the payload becomes the active strategy

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::backend::BackendId;
use crate::config::FallbackConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackStrategy {
    /// Keyword-scored supportive reply (conversational-ai).
    TemplatedReply,
    /// Ask the user to type instead of speaking (speech-to-text).
    TextInputPrompt,
    /// Show the text on screen instead of playing it (text-to-speech).
    DisplayText,
    /// Non-semantic placeholder audio marker (text-to-speech).
    PlaceholderAudio,
    /// Generic "temporarily unavailable" notice.
    StaticNotice,
}

impl FallbackStrategy {
    pub fn defaults_for(backend: BackendId) -> Vec<FallbackStrategy> {
        match backend {
            BackendId::ConversationalAi => {
                vec![FallbackStrategy::TemplatedReply, FallbackStrategy::StaticNotice]
            }
            BackendId::SpeechToText => vec![FallbackStrategy::TextInputPrompt],
            BackendId::TextToSpeech => vec![
                FallbackStrategy::DisplayText,
                FallbackStrategy::PlaceholderAudio,
            ],
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FallbackError {
    #[error("fallback disabled for {0}")]
    Disabled(BackendId),

    #[error("no fallback strategy for {0} could handle the payload")]
    NoCandidate(BackendId),
}

/// A crisis or support line attached to every conversational fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupportResource {
    pub name: &'static str,
    pub phone: &'static str,
    pub description: &'static str,
    pub url: &'static str,
}

pub const CRISIS_RESOURCES: &[SupportResource] = &[
    SupportResource {
        name: "988 Suicide & Crisis Lifeline",
        phone: "988",
        description: "Call or text 988 for free, confidential support, 24/7.",
        url: "https://988lifeline.org",
    },
    SupportResource {
        name: "Crisis Text Line",
        phone: "741741",
        description: "Text HOME to 741741 to reach a trained crisis counselor.",
        url: "https://www.crisistextline.org",
    },
    SupportResource {
        name: "Emergency Services",
        phone: "911",
        description: "If you are in immediate danger, call emergency services.",
        url: "https://www.911.gov",
    },
];

/// What the conversational fallback picked up from the user's message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SupportCategory {
    Crisis,
    Anxiety,
    Sadness,
    General,
}

const CRISIS_KEYWORDS: &[&str] = &[
    "kill myself",
    "suicide",
    "suicidal",
    "end my life",
    "want to die",
    "self harm",
    "self-harm",
    "hurt myself",
    "no reason to live",
    "better off dead",
];

const ANXIETY_KEYWORDS: &[&str] = &[
    "anxious",
    "anxiety",
    "panic",
    "worried",
    "nervous",
    "overwhelmed",
    "stressed",
    "can't breathe",
];

const SADNESS_KEYWORDS: &[&str] = &[
    "sad",
    "depressed",
    "lonely",
    "hopeless",
    "empty",
    "crying",
    "worthless",
    "grief",
];

const CRISIS_REPLIES: &[&str] = &[
    "I'm really glad you told me. What you're feeling matters, and you don't have to go through it alone. Please reach out to one of the crisis lines below right now; they are available 24/7.",
    "It sounds like you're in a lot of pain right now. Your safety matters most. Please contact one of the crisis lines below, or call emergency services if you are in immediate danger.",
];

const ANXIETY_REPLIES: &[&str] = &[
    "That sounds really overwhelming. Let's slow down together: breathe in for four counts, hold for four, and breathe out for six. I'm having trouble connecting right now, but the resources below are always available.",
    "Anxiety can feel intense, and it does pass. Try naming five things you can see around you. My full responses are temporarily unavailable, so please lean on the resources below if you need to talk to someone.",
];

const SADNESS_REPLIES: &[&str] = &[
    "I'm sorry you're feeling this way. Your feelings are valid, and it's okay to not be okay. I'm having trouble responding fully right now; if you need someone to talk to, the resources below can help.",
    "Thank you for sharing how you feel. Reaching out is a real step. I can't give a full response at the moment, but support is available through the resources below.",
];

const GENERAL_REPLIES: &[&str] = &[
    "Thanks for your message. I'm having trouble responding right now, so please try again in a little while. If you need support in the meantime, the resources below are available 24/7.",
    "I'm temporarily unable to give you a full response. Please try again shortly. If you need to talk to someone now, the resources below are always there.",
];

/// Degraded conversational reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationReply {
    pub message: String,
    pub category: SupportCategory,
    pub crisis: bool,
    pub degraded: bool,
    pub resources: &'static [SupportResource],
}

/// Lowercased words, split on anything that is not a letter or digit.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Keywords matched as whole words or whole-word phrases.
fn score(words: &[String], keywords: &[&str]) -> usize {
    keywords
        .iter()
        .filter(|keyword| {
            let phrase = tokenize(keyword);
            !phrase.is_empty() && words.windows(phrase.len()).any(|w| w == phrase.as_slice())
        })
        .count()
}

/// Pick a category by keyword precedence: crisis, then anxiety, then sadness.
pub fn categorize(text: &str) -> SupportCategory {
    let words = tokenize(text);
    if score(&words, CRISIS_KEYWORDS) > 0 {
        SupportCategory::Crisis
    } else if score(&words, ANXIETY_KEYWORDS) > 0 {
        SupportCategory::Anxiety
    } else if score(&words, SADNESS_KEYWORDS) > 0 {
        SupportCategory::Sadness
    } else {
        SupportCategory::General
    }
}

/// Build a templated reply for the user's message.
pub fn conversation_reply(text: Option<&str>) -> ConversationReply {
    let category = text.map(categorize).unwrap_or(SupportCategory::General);
    let templates = match category {
        SupportCategory::Crisis => CRISIS_REPLIES,
        SupportCategory::Anxiety => ANXIETY_REPLIES,
        SupportCategory::Sadness => SADNESS_REPLIES,
        SupportCategory::General => GENERAL_REPLIES,
    };
    ConversationReply {
        message: templates[fastrand::usize(..templates.len())].to_string(),
        category,
        crisis: category == SupportCategory::Crisis,
        degraded: true,
        resources: CRISIS_RESOURCES,
    }
}

/// Extract the user-facing text from an opaque payload.
///
/// Accepts a bare string, an object with a common text field, or a chat-style
/// `messages` array (last entry wins).
pub fn payload_text(payload: &Value) -> Option<&str> {
    match payload {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => ["message", "text", "prompt", "content", "input"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .or_else(|| {
                map.get("messages")
                    .and_then(Value::as_array)
                    .and_then(|messages| messages.last())
                    .and_then(|last| last.get("content"))
                    .and_then(Value::as_str)
            }),
        _ => None,
    }
}

/// Produces degraded output for one backend.
#[derive(Debug)]
pub struct FallbackResponder {
    backend: BackendId,
    enabled: bool,
    candidates: Vec<FallbackStrategy>,
    active: AtomicUsize,
}

impl FallbackResponder {
    pub fn new(backend: BackendId, config: &FallbackConfig) -> Self {
        let candidates = if config.strategies.is_empty() {
            FallbackStrategy::defaults_for(backend)
        } else {
            config.strategies.clone()
        };
        Self {
            backend,
            enabled: config.enabled,
            candidates,
            active: AtomicUsize::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.candidates.is_empty()
    }

    pub fn candidates(&self) -> &[FallbackStrategy] {
        &self.candidates
    }

    /// Strategy that produced the most recent fallback.
    pub fn active_strategy(&self) -> Option<FallbackStrategy> {
        self.candidates
            .get(self.active.load(Ordering::Relaxed))
            .copied()
    }

    /// Produce a degraded result, returning the strategy that made it.
    pub fn respond(&self, payload: &Value) -> Result<(FallbackStrategy, Value), FallbackError> {
        if !self.enabled {
            return Err(FallbackError::Disabled(self.backend));
        }
        for (idx, strategy) in self.candidates.iter().enumerate() {
            if let Some(output) = produce(*strategy, self.backend, payload) {
                self.active.store(idx, Ordering::Relaxed);
                return Ok((*strategy, output));
            }
        }
        Err(FallbackError::NoCandidate(self.backend))
    }
}

fn produce(strategy: FallbackStrategy, backend: BackendId, payload: &Value) -> Option<Value> {
    match (strategy, backend) {
        (FallbackStrategy::TemplatedReply, BackendId::ConversationalAi) => {
            serde_json::to_value(conversation_reply(payload_text(payload))).ok()
        }
        (FallbackStrategy::TextInputPrompt, BackendId::SpeechToText) => Some(json!({
            "status": "input_unavailable",
            "transcript": null,
            "alternative": "text-input",
            "message": "We couldn't process your voice message right now. Please type your message instead.",
        })),
        (FallbackStrategy::DisplayText, BackendId::TextToSpeech) => {
            let text = payload_text(payload)?;
            Some(json!({
                "status": "playback_unavailable",
                "mode": "display-text",
                "audio": null,
                "text": text,
                "guidance": "Audio playback is unavailable right now. The message is shown as text instead.",
            }))
        }
        (FallbackStrategy::PlaceholderAudio, BackendId::TextToSpeech) => Some(json!({
            "status": "playback_unavailable",
            "mode": "placeholder-audio",
            "audio": {
                "kind": "placeholder",
                "format": "silence",
                "durationMs": 0,
                "synthesized": false,
            },
            "guidance": "Speech synthesis is unavailable. This placeholder contains no spoken content.",
        })),
        (FallbackStrategy::StaticNotice, BackendId::ConversationalAi) => Some(json!({
            "status": "unavailable",
            "message": "This feature is temporarily unavailable. Please try again shortly.",
            "degraded": true,
            "resources": CRISIS_RESOURCES,
        })),
        (FallbackStrategy::StaticNotice, _) => Some(json!({
            "status": "unavailable",
            "message": "This feature is temporarily unavailable. Please try again shortly.",
            "degraded": true,
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder(backend: BackendId) -> FallbackResponder {
        FallbackResponder::new(backend, &FallbackConfig::default())
    }

    #[test]
    fn test_crisis_keywords_outrank_everything() {
        assert_eq!(
            categorize("I'm so anxious and sad I want to kill myself"),
            SupportCategory::Crisis
        );
        assert_eq!(categorize("anxious and sad"), SupportCategory::Anxiety);
        assert_eq!(categorize("feeling lonely tonight"), SupportCategory::Sadness);
        assert_eq!(categorize("what time is my booking"), SupportCategory::General);
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        assert_eq!(categorize("the crusade starts today"), SupportCategory::General);
        assert_eq!(categorize("this form is exempty"), SupportCategory::General);
        assert_eq!(categorize("I feel SAD, and empty."), SupportCategory::Sadness);
        assert_eq!(categorize("thoughts of Self-Harm"), SupportCategory::Crisis);
        assert_eq!(categorize("I can’t breathe"), SupportCategory::Anxiety);
        assert_eq!(categorize("killing it at work, myself included"), SupportCategory::General);
    }

    #[test]
    fn test_crisis_reply_has_phone_resources() {
        let (strategy, output) = responder(BackendId::ConversationalAi)
            .respond(&json!({"message": "I think I'm going to kill myself"}))
            .unwrap();
        assert_eq!(strategy, FallbackStrategy::TemplatedReply);
        assert_eq!(output["crisis"], true);
        assert_eq!(output["category"], "crisis");
        let resources = output["resources"].as_array().unwrap();
        assert!(resources
            .iter()
            .any(|r| r["phone"].as_str().is_some_and(|p| !p.is_empty())));
    }

    #[test]
    fn test_general_reply_still_lists_resources() {
        let reply = conversation_reply(None);
        assert_eq!(reply.category, SupportCategory::General);
        assert!(!reply.crisis);
        assert_eq!(reply.resources.len(), CRISIS_RESOURCES.len());
        assert!(GENERAL_REPLIES.contains(&reply.message.as_str()));
    }

    #[test]
    fn test_speech_to_text_never_fabricates_transcript() {
        let (_, output) = responder(BackendId::SpeechToText)
            .respond(&json!({"audio": "base64..."}))
            .unwrap();
        assert_eq!(output["status"], "input_unavailable");
        assert!(output["transcript"].is_null());
        assert_eq!(output["alternative"], "text-input");
    }

    #[test]
    fn test_text_to_speech_falls_through_to_placeholder() {
        let tts = responder(BackendId::TextToSpeech);
        let (strategy, output) = tts.respond(&json!({"text": "You did great today."})).unwrap();
        assert_eq!(strategy, FallbackStrategy::DisplayText);
        assert_eq!(output["text"], "You did great today.");
        assert_eq!(tts.active_strategy(), Some(FallbackStrategy::DisplayText));

        let (strategy, output) = tts.respond(&json!({"voice": "calm"})).unwrap();
        assert_eq!(strategy, FallbackStrategy::PlaceholderAudio);
        assert_eq!(output["audio"]["synthesized"], false);
        assert_eq!(tts.active_strategy(), Some(FallbackStrategy::PlaceholderAudio));
    }

    #[test]
    fn test_disabled_and_unusable_configs() {
        let disabled = FallbackResponder::new(
            BackendId::SpeechToText,
            &FallbackConfig {
                enabled: false,
                strategies: Vec::new(),
            },
        );
        assert!(!disabled.is_enabled());
        assert_eq!(
            disabled.respond(&Value::Null),
            Err(FallbackError::Disabled(BackendId::SpeechToText))
        );

        let mismatched = FallbackResponder::new(
            BackendId::SpeechToText,
            &FallbackConfig {
                enabled: true,
                strategies: vec![FallbackStrategy::TemplatedReply],
            },
        );
        assert_eq!(
            mismatched.respond(&Value::Null),
            Err(FallbackError::NoCandidate(BackendId::SpeechToText))
        );
    }

    #[test]
    fn test_payload_text_shapes() {
        assert_eq!(payload_text(&json!("hi")), Some("hi"));
        assert_eq!(payload_text(&json!({"prompt": "p"})), Some("p"));
        assert_eq!(
            payload_text(&json!({"messages": [{"role": "user", "content": "a"}, {"role": "user", "content": "b"}]})),
            Some("b")
        );
        assert_eq!(payload_text(&json!(42)), None);
    }
}
