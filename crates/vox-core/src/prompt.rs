/// System-prompt composition for the live session.
///
/// The prompt is assembled from a fixed greeting directive plus optional
/// custom instructions, user name, and grounding context. Settings are
/// mutable at runtime via the REST endpoints; each connect attempt reads
/// the current values.
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_NAME: &str = "User";
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful real-time AI assistant.";

const GREETING_DIRECTIVE: &str = "You are a real-time AI voice agent.\n\n\
IMPORTANT: You MUST begin every new conversation by saying EXACTLY:\n\
\"Hello. I am your assistant. How can I help you today?\"\n\
Do NOT skip or modify this greeting. Always start with it before anything else.\n";

const CLOSING_DIRECTIVE: &str = "You support real-time voice interaction and can be interrupted naturally.\n\
If the user shares their camera or an image, use that visual context to help them.\n\
Keep responses concise, natural, and conversational.\n";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptSettings {
    pub user_name: String,
    pub custom_instructions: String,
    pub grounding_context: String,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            user_name: DEFAULT_USER_NAME.to_string(),
            custom_instructions: DEFAULT_INSTRUCTIONS.to_string(),
            grounding_context: String::new(),
        }
    }
}

impl PromptSettings {
    /// Compose the full system instruction for a connect attempt.
    pub fn compose(&self) -> String {
        let mut prompt = String::from(GREETING_DIRECTIVE);

        if !self.custom_instructions.is_empty() {
            prompt.push('\n');
            prompt.push_str(&self.custom_instructions);
            prompt.push('\n');
        }

        // The default placeholder name adds nothing.
        if !self.user_name.is_empty() && self.user_name != DEFAULT_USER_NAME {
            prompt.push_str(&format!("\nUser's name: {}\n", self.user_name));
        }

        if !self.grounding_context.is_empty() {
            prompt.push_str(&format!(
                "\n--- GROUNDING CONTEXT ---\n{}\n--- END CONTEXT ---\n",
                self.grounding_context
            ));
        }

        prompt.push('\n');
        prompt.push_str(CLOSING_DIRECTIVE);
        prompt
    }
}
