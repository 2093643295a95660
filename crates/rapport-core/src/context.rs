use serde::{Deserialize, Serialize};

/// A single entry in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// "user" or "assistant".
    pub role: String,
    /// The message content.
    pub content: String,
}

/// Conversation context passed to a completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// System prompt prepended to every request.
    pub system_prompt: String,
    /// Conversation history (oldest first).
    pub history: Vec<ContextEntry>,
    /// The current user message.
    pub current_message: String,
    /// Override the provider's default model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Context {
    /// Create a new context with just a current message.
    pub fn new(message: &str) -> Self {
        Self {
            system_prompt: String::new(),
            history: Vec::new(),
            current_message: message.to_string(),
            model: None,
        }
    }

    /// Flatten the context into a single prompt string for providers
    /// that accept one text input.
    pub fn to_prompt_string(&self) -> String {
        let mut parts = Vec::new();

        if !self.system_prompt.is_empty() {
            parts.push(format!("[System]\n{}", self.system_prompt));
        }

        for entry in &self.history {
            let role = if entry.role == "user" {
                "User"
            } else {
                "Assistant"
            };
            parts.push(format!("[{}]\n{}", role, entry.content));
        }

        parts.push(format!("[User]\n{}", self.current_message));

        parts.join("\n\n")
    }

    /// Convert the context to structured API messages.
    ///
    /// Returns `(system_prompt, messages)` — chat-completion APIs take the
    /// system prompt outside the messages array.
    pub fn to_api_messages(&self) -> (String, Vec<ContextEntry>) {
        let mut messages = Vec::with_capacity(self.history.len() + 1);

        for entry in &self.history {
            messages.push(entry.clone());
        }

        messages.push(ContextEntry {
            role: "user".to_string(),
            content: self.current_message.clone(),
        });

        (self.system_prompt.clone(), messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_api_messages_basic() {
        let ctx = Context::new("hello");
        let (system, messages) = ctx.to_api_messages();
        assert!(system.is_empty());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content, "hello");
    }

    #[test]
    fn test_to_api_messages_with_history() {
        let ctx = Context {
            system_prompt: "Be friendly.".into(),
            history: vec![
                ContextEntry {
                    role: "user".into(),
                    content: "Hi".into(),
                },
                ContextEntry {
                    role: "assistant".into(),
                    content: "Hello!".into(),
                },
            ],
            current_message: "How are you?".into(),
            model: None,
        };
        let (system, messages) = ctx.to_api_messages();
        assert_eq!(system, "Be friendly.");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].role, "user");
        assert_eq!(messages[2].content, "How are you?");
    }

    #[test]
    fn test_to_prompt_string_labels_roles() {
        let mut ctx = Context::new("what's new?");
        ctx.system_prompt = "rules".into();
        ctx.history.push(ContextEntry {
            role: "assistant".into(),
            content: "welcome".into(),
        });
        let prompt = ctx.to_prompt_string();
        assert!(prompt.starts_with("[System]\nrules"));
        assert!(prompt.contains("[Assistant]\nwelcome"));
        assert!(prompt.ends_with("[User]\nwhat's new?"));
    }
}
