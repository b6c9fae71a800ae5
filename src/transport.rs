//! What the bot needs from a chat service, and nothing more.

use async_trait::async_trait;

use crate::types::Profile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    /// Token handed back in [`Event::Action`] when pressed.
    pub action: String,
}

impl Button {
    pub fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: action.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Rows of buttons, top to bottom.
    pub keyboard: Vec<Vec<Button>>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
        }
    }

    #[must_use]
    pub fn button(mut self, label: &str, action: &str) -> Self {
        self.keyboard.push(vec![Button::new(label, action)]);
        self
    }

    #[must_use]
    pub fn back(self) -> Self {
        self.button("🔙 Back", "back")
    }

    /// Every action token on the keyboard, in display order.
    pub fn actions(&self) -> Vec<&str> {
        self.keyboard
            .iter()
            .flatten()
            .map(|b| b.action.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `/start` or any free text.
    Start { profile: Profile },
    /// A keyboard button was pressed.
    Action {
        chat: i64,
        token: String,
        /// Transport handle to acknowledge the press, if it needs one.
        ack: Option<String>,
    },
}

impl Event {
    pub fn chat(&self) -> i64 {
        match self {
            Self::Start { profile } => profile.chat_id,
            Self::Action { chat, .. } => *chat,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, chat: i64, reply: &Reply) -> anyhow::Result<()>;

    async fn acknowledge(&self, ack: &str) -> anyhow::Result<()>;
}
