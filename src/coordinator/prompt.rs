//! Request message assembly.

use crate::types::Message;

/// Builds the message list sent for one generation.
pub trait MessageBuilder: Send + Sync {
    fn build(
        &self,
        conversation_id: &str,
        user_message: &str,
        context: Option<&str>,
    ) -> Vec<Message>;
}

/// System prompt, then optional context, then the user message.
#[derive(Debug, Clone, Default)]
pub struct DefaultMessageBuilder {
    system_prompt: Option<String>,
}

impl DefaultMessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

impl MessageBuilder for DefaultMessageBuilder {
    fn build(
        &self,
        _conversation_id: &str,
        user_message: &str,
        context: Option<&str>,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(3);
        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            messages.push(Message::system(prompt));
        }
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            messages.push(Message::system(format!("Context:\n{context}")));
        }
        messages.push(Message::user(user_message));
        messages
    }
}
