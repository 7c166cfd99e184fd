//! FIFO queue of messages that could not be sent yet.

use std::collections::VecDeque;

use serde_json::Value;

/// A message waiting for the connection to come back.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub text: String,
    pub data: Option<Value>,
}

impl PendingMessage {
    pub fn new(text: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            text: text.into(),
            data,
        }
    }
}

/// Unbounded, in-memory, insertion-ordered message queue.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    entries: VecDeque<PendingMessage>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail.
    pub fn push(&mut self, message: PendingMessage) {
        self.entries.push_back(message);
    }

    /// Remove and return every entry in insertion order, leaving the buffer
    /// empty.
    pub fn drain(&mut self) -> Vec<PendingMessage> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_order_and_empties() {
        let mut buffer = MessageBuffer::new();
        buffer.push(PendingMessage::new("a", None));
        buffer.push(PendingMessage::new("b", Some(serde_json::json!({"k": 1}))));
        buffer.push(PendingMessage::new("c", None));
        assert_eq!(buffer.len(), 3);

        let drained = buffer.drain();
        let texts: Vec<&str> = drained.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["a", "b", "c"]);
        assert_eq!(drained[1].data.as_ref().unwrap()["k"], 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_empty() {
        let mut buffer = MessageBuffer::new();
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_pushes_after_drain_are_appended() {
        let mut buffer = MessageBuffer::new();
        buffer.push(PendingMessage::new("first", None));
        let _ = buffer.drain();
        buffer.push(PendingMessage::new("second", None));
        buffer.push(PendingMessage::new("third", None));
        let texts: Vec<String> = buffer.drain().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, ["second", "third"]);
    }
}
