//! Per-chat window of recent turns, forwarded with each chat request when
//! history forwarding is enabled. Kept in memory only.

use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use super::backend::ChatTurn;

pub struct ConversationHistory {
    turns: RwLock<HashMap<i64, VecDeque<ChatTurn>>>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: RwLock::new(HashMap::new()),
            max_turns,
        }
    }

    /// Messages for a new request: the stored window followed by `text`.
    pub async fn messages_for(&self, chat_id: i64, text: &str) -> Vec<ChatTurn> {
        let turns = self.turns.read().await;
        let mut messages: Vec<ChatTurn> = turns
            .get(&chat_id)
            .map(|window| window.iter().cloned().collect())
            .unwrap_or_default();
        messages.push(ChatTurn::user(text));
        messages
    }

    /// Store a completed exchange, dropping the oldest turns past the limit.
    pub async fn record(&self, chat_id: i64, user_text: &str, assistant_text: &str) {
        if self.max_turns == 0 {
            return;
        }
        let mut turns = self.turns.write().await;
        let window = turns.entry(chat_id).or_default();
        window.push_back(ChatTurn::user(user_text));
        window.push_back(ChatTurn::assistant(assistant_text));
        while window.len() > self.max_turns {
            window.pop_front();
        }
    }

    pub async fn len(&self, chat_id: i64) -> usize {
        self.turns
            .read()
            .await
            .get(&chat_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}
