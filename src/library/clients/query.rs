use super::execute_json;
use crate::library::storage::StoredMessage;
use crate::library::BoxedError;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Request};
use serde::{Deserialize, Serialize};

/// Response of a paginated history read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetMessagesResponse {
    /// Page of messages, newest first
    #[serde(rename = "Messages")]
    pub messages: Vec<StoredMessage>,
    /// Continuation token for the next page, empty when the scan is exhausted
    #[serde(rename = "NextToken")]
    pub next_token: String,
}

/// Response of a "since marker" read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshMessagesResponse {
    /// Messages strictly newer than the marker, newest first
    #[serde(rename = "Messages")]
    pub messages: Vec<StoredMessage>,
}

/// Parameters of a paginated history read
#[derive(Debug, Default)]
pub struct GetMessagesProps {
    /// Upper bound on the returned page, service default when absent
    pub page_size: Option<usize>,
    /// Continuation token of the previous page
    pub next_token: Option<String>,
}

/// Client for the query service
pub struct QueryClient {
    host: String,
    client: Client<HttpConnector>,
}

impl QueryClient {
    /// Creates a new instance talking to the given host
    pub fn new(host: String) -> Self {
        Self {
            host,
            client: Client::new(),
        }
    }

    /// Fetches one page of conversation history
    pub async fn get_messages(
        &self,
        conversation_id: &str,
        props: GetMessagesProps,
    ) -> Result<GetMessagesResponse, BoxedError> {
        let mut url = format!(
            "{}/api/v1/messages?conversation_id={}",
            self.host,
            urlencode(conversation_id)
        );

        if let Some(page_size) = props.page_size {
            url.push_str(&format!("&page_size={}", page_size));
        }
        if let Some(next_token) = props.next_token {
            url.push_str(&format!("&next_token={}", urlencode(&next_token)));
        }

        let request = Request::get(url).body(Body::empty())?;

        execute_json(&self.client, request).await
    }

    /// Fetches every message newer than the given marker
    pub async fn refresh_messages(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<RefreshMessagesResponse, BoxedError> {
        let url = format!(
            "{}/api/v1/messages/refresh?conversation_id={}&message_id={}",
            self.host,
            urlencode(conversation_id),
            urlencode(message_id)
        );

        let request = Request::get(url).body(Body::empty())?;

        execute_json(&self.client, request).await
    }
}

fn urlencode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());

    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{:02X}", other)),
        }
    }

    encoded
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn escape_tokens_for_the_query_string() {
        assert_eq!(urlencode("AQID=="), "AQID%3D%3D");
        assert_eq!(urlencode("plain-token_1.2~3"), "plain-token_1.2~3");
    }
}
