use serde::{Deserialize, Serialize};

/// Header carrying the identifier assigned to a message at ingress
pub const MESSAGE_ID_HEADER: &str = "message_id";

/// Type label attached to chat message notifications
pub const NOTIFICATION_TYPE_MESSAGE: &str = "Message";

/// Payload of a chat message travelling through the queue
///
/// The conversation id is deliberately absent, the record key is
/// authoritative for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author of the message
    pub user: String,
    /// Message text
    pub message: String,
}

/// Broadcast channel on which live updates for a conversation are published
pub fn conversation_channel(conversation_id: &str) -> String {
    format!("conversation:{}", conversation_id)
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn serialize_payloads_compactly() {
        let message = ChatMessage {
            user: "alice".into(),
            message: "hi".into(),
        };

        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"user":"alice","message":"hi"}"#
        );
    }

    #[test]
    fn derive_conversation_channels() {
        assert_eq!(conversation_channel("c1"), "conversation:c1");
    }
}
