//! Prompt construction
//!
//! Builds the conversation-partner system prompt for a learner's languages
//! and CEFR level, and maps conversation history onto chat messages.

use parley_core::{ConversationMessage, Level, Role, UserSettings};
use serde::Serialize;

/// Chat-completions message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// "developer", "user", "assistant" or "tool"
    pub role: &'static str,
    /// Serialized as `null` for assistant messages that only carry tool calls
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ChatToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn developer(content: impl Into<String>) -> Self {
        Self::text("developer", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text("assistant", content)
    }

    /// Assistant turn consisting of a single tool call
    pub fn assistant_tool_call(call: ChatToolCall) -> Self {
        Self {
            role: "assistant",
            content: None,
            tool_calls: vec![call],
            tool_call_id: None,
        }
    }

    /// Result of a tool call
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool",
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Tool call echoed back to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ChatFunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatFunctionCall {
    pub name: String,
    pub arguments: String,
}

impl ChatToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function",
            function: ChatFunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// How to pitch replies at a CEFR level
pub fn level_instructions(level: Level) -> &'static str {
    match level {
        Level::A1 => {
            "Use only the most basic vocabulary and very short sentences. \
             Stick to the present tense and avoid idioms. \
             When the user makes a mistake, just rephrase it correctly in your reply and move on."
        }
        Level::A2 => {
            "Use simple everyday vocabulary and short sentences. \
             Basic past and future tenses are fine, but avoid idioms and abstract concepts. \
             Rephrase the user's mistakes naturally in your reply."
        }
        Level::B1 => {
            "Use common vocabulary with moderate sentence complexity. \
             Introduce connectors and new vocabulary that can be understood from context. \
             Rephrase mistakes naturally instead of giving explicit grammar corrections."
        }
        Level::B2 => {
            "Use varied vocabulary and complex sentence structures. Idioms are welcome. \
             Rephrase mistakes naturally and only point out grammar when an error keeps recurring."
        }
        Level::C1 => {
            "Use advanced vocabulary, idioms and nuanced expressions. \
             Humor and cultural references are welcome. \
             Only correct errors that change the meaning or the register."
        }
        Level::C2 => {
            "Speak with full native-level complexity. Do not simplify anything."
        }
    }
}

/// System prompt for a conversation partner
pub fn system_prompt(settings: &UserSettings) -> String {
    let target = settings.target_language.name();
    let native = settings.native_language.name();
    let level = settings.level;

    let lines = [
        format!("You are a fun, curious, and opinionated conversation partner who speaks {target}."),
        "You are NOT a teacher or tutor. You are a friend the user is chatting with to practice the language.".to_string(),
        String::new(),
        "You drive the conversation. You are the initiator.".to_string(),
        "Bring up interesting topics: movies, weird facts, hot takes, travel stories, hypothetical dilemmas, personal questions.".to_string(),
        "When the user gives a short answer or the conversation stalls, dig deeper into what they said or pivot to something new.".to_string(),
        "Never let the conversation die. If the user says \"I don't know\", give them two fun options to pick from.".to_string(),
        "Be opinionated. Disagree sometimes. Have a personality.".to_string(),
        String::new(),
        "Keep your replies short, 1 to 3 sentences, like a real chat message.".to_string(),
        "Ask exactly one question per reply so the user always knows what to answer.".to_string(),
        "Never use bullet points, lists, or numbered items.".to_string(),
        String::new(),
        format!("The user's native language is {native}. Their level is CEFR {}.", level.as_str()),
        level_instructions(level).to_string(),
        String::new(),
        format!("Always respond in {target}."),
        format!(
            "If the user seems not to understand a word, explain it briefly in {native} \
             (for example: \"saudade\" means a deep longing for something absent), then carry on in {target}. \
             Do not explain by rephrasing in {target}."
        ),
        format!("If the user writes in {native}, playfully steer them back (\"Hey, {target} only!\")."),
        String::new(),
        "Do not say things like \"Great job!\", \"Well done!\" or \"Let's practice...\".".to_string(),
        "Never ask the user to repeat a sentence.".to_string(),
        "Do not give vocabulary lists unless the user asks for one.".to_string(),
        "Never ask \"What would you like to talk about?\".".to_string(),
        String::new(),
        "When the user's latest message contains language errors, report them with the report_corrections tool \
         and still reply normally."
            .to_string(),
    ];

    lines.join("\n")
}

/// Chat messages for a generation request: the system prompt followed by
/// the conversation context
pub fn chat_messages(messages: &[ConversationMessage], settings: &UserSettings) -> Vec<ChatMessage> {
    let mut chat = Vec::with_capacity(messages.len() + 1);
    chat.push(ChatMessage::developer(system_prompt(settings)));
    chat.extend(messages.iter().map(|m| match m.role {
        Role::User => ChatMessage::user(m.content.clone()),
        Role::Assistant => ChatMessage::assistant(m.content.clone()),
    }));
    chat
}
