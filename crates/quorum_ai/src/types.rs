use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of a chat-style request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(MessageRole::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(MessageRole::System, content)
    }
}

/// Content of the most recent user message, or `""` when there is none.
pub fn latest_user_prompt(messages: &[ChatMessage]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

/// Reject requests that cannot be forwarded to any backend.
pub fn validate_messages(messages: &[ChatMessage]) -> Result<(), String> {
    if messages.is_empty() {
        return Err("messages must not be empty".into());
    }
    if let Some(idx) = messages.iter().position(|m| m.content.trim().is_empty()) {
        return Err(format!("message {idx} has no content"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Invocation parameters
// ---------------------------------------------------------------------------

/// Sampling parameters forwarded to a backend. `None` leaves the provider
/// default in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl InvocationParams {
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
        }
    }
}

// ---------------------------------------------------------------------------
// Task categories
// ---------------------------------------------------------------------------

/// The kind of work a prompt asks for. Drives catalog affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Coding,
    Reasoning,
    Creative,
    Analysis,
    Simple,
    General,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 6] = [
        Self::Coding,
        Self::Reasoning,
        Self::Creative,
        Self::Analysis,
        Self::Simple,
        Self::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Reasoning => "reasoning",
            Self::Creative => "creative",
            Self::Analysis => "analysis",
            Self::Simple => "simple",
            Self::General => "general",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
    }

    /// Catalog strength tags that count toward this category, strongest
    /// signal first.
    pub fn affinity_tags(self) -> &'static [&'static str] {
        match self {
            Self::Coding => &[
                "code generation",
                "debugging",
                "software engineering",
            ],
            Self::Reasoning => &["complex reasoning", "reasoning", "mathematics"],
            Self::Creative => &["creative writing", "storytelling", "long-form content"],
            Self::Analysis => &["data analysis", "research", "detailed explanations"],
            Self::Simple => &["fast response time", "simple queries", "low cost"],
            Self::General => &["general knowledge", "conversation", "structured output"],
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_user_prompt_skips_trailing_assistant_turns() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("first"),
            ChatMessage::text(MessageRole::Assistant, "reply"),
            ChatMessage::user("second"),
            ChatMessage::text(MessageRole::Assistant, "reply 2"),
        ];
        assert_eq!(latest_user_prompt(&messages), "second");
        assert_eq!(latest_user_prompt(&[ChatMessage::system("x")]), "");
    }

    #[test]
    fn validate_rejects_empty_and_blank() {
        assert!(validate_messages(&[]).is_err());
        let err = validate_messages(&[ChatMessage::user("ok"), ChatMessage::user("  ")]).unwrap_err();
        assert_eq!(err, "message 1 has no content");
        assert!(validate_messages(&[ChatMessage::user("hello")]).is_ok());
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn category_parse_is_case_insensitive() {
        assert_eq!(TaskCategory::parse(" Coding "), Some(TaskCategory::Coding));
        assert_eq!(TaskCategory::parse("ANALYSIS"), Some(TaskCategory::Analysis));
        assert_eq!(TaskCategory::parse("poetry"), None);
        for c in TaskCategory::ALL {
            assert_eq!(TaskCategory::parse(&c.to_string()), Some(c));
            assert!(!c.affinity_tags().is_empty());
        }
    }

    #[test]
    fn params_omit_unset_fields() {
        let json = serde_json::to_string(&InvocationParams::default()).unwrap();
        assert_eq!(json, "{}");
        let p = InvocationParams::new(0.1, 200);
        assert_eq!(p.max_tokens, Some(200));
    }
}
