//! JSON Stream Codec
//!
//! Frames arrive as JSON arrays (occasionally a bare object). Each element
//! is decoded on its own so a single malformed quote does not discard the
//! rest of its frame.

use serde::Serialize;

use super::messages::{
    ErrorMessage, QuoteMessage, StreamMessage, SubscriptionMessage, SuccessMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding or decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame was neither an array nor an object.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),

    /// Element had no `T` discriminator.
    #[error("message without type field")]
    MissingType,
}

/// JSON codec for the market data stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Split a text frame into its raw elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON or is not an array
    /// or object.
    pub fn split_frame(&self, text: &str) -> Result<Vec<serde_json::Value>, CodecError> {
        let trimmed = text.trim();
        if trimmed.starts_with('[') {
            Ok(serde_json::from_str(trimmed)?)
        } else if trimmed.starts_with('{') {
            Ok(vec![serde_json::from_str(trimmed)?])
        } else {
            Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {}",
                trimmed.chars().take(50).collect::<String>()
            )))
        }
    }

    /// Decode one frame element.
    ///
    /// # Errors
    ///
    /// Returns an error if the element has no type or does not match the
    /// schema of its type.
    pub fn decode_message(&self, value: serde_json::Value) -> Result<StreamMessage, CodecError> {
        let Some(kind) = value.get("T").and_then(serde_json::Value::as_str) else {
            return Err(CodecError::MissingType);
        };

        let message = match kind {
            "success" => StreamMessage::Success(serde_json::from_value::<SuccessMessage>(value)?),
            "error" => StreamMessage::Error(serde_json::from_value::<ErrorMessage>(value)?),
            "subscription" => {
                StreamMessage::Subscription(serde_json::from_value::<SubscriptionMessage>(value)?)
            }
            "q" => StreamMessage::Quote(serde_json::from_value::<QuoteMessage>(value)?),
            other => StreamMessage::Other(other.to_string()),
        };
        Ok(message)
    }

    /// Decode a whole frame, failing on the first bad element.
    ///
    /// Used during the handshake, where any malformed control message is
    /// fatal.
    ///
    /// # Errors
    ///
    /// Returns the first frame or element error.
    pub fn decode(&self, text: &str) -> Result<Vec<StreamMessage>, CodecError> {
        self.split_frame(text)?
            .into_iter()
            .map(|value| self.decode_message(value))
            .collect()
    }

    /// Encode a request.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode<T: Serialize>(&self, request: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(request)?)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::super::messages::{SubscriptionRequest, SuccessKind};
    use super::*;

    #[test]
    fn decodes_control_messages() {
        let codec = JsonCodec::new();
        let messages = codec
            .decode(r#"[{"T":"success","msg":"connected"},{"T":"error","code":402,"msg":"auth failed"}]"#)
            .unwrap();

        assert_eq!(
            messages[0],
            StreamMessage::Success(SuccessMessage {
                msg: SuccessKind::Connected
            })
        );
        assert!(matches!(&messages[1], StreamMessage::Error(e) if e.code == 402));
    }

    #[test]
    fn decodes_bare_object() {
        let messages = JsonCodec::new()
            .decode(r#"{"T":"subscription","quotes":["AAPL"],"trades":[]}"#)
            .unwrap();
        assert_eq!(
            messages,
            vec![StreamMessage::Subscription(SubscriptionMessage {
                quotes: vec!["AAPL".into()]
            })]
        );
    }

    #[test]
    fn unsubscribed_types_are_other() {
        let messages = JsonCodec::new()
            .decode(r#"[{"T":"t","S":"AAPL","p":1.0}]"#)
            .unwrap();
        assert_eq!(messages, vec![StreamMessage::Other("t".into())]);
    }

    #[test]
    fn one_bad_element_leaves_the_rest_decodable() {
        let codec = JsonCodec::new();
        let elements = codec
            .split_frame(r#"[{"T":"q","S":"AAA","bp":"oops"},{"T":"q","S":"BBB","bp":1.25,"ap":1.5}]"#)
            .unwrap();
        let decoded: Vec<_> = elements
            .into_iter()
            .map(|v| codec.decode_message(v))
            .collect();

        assert!(decoded[0].is_err());
        match &decoded[1] {
            Ok(StreamMessage::Quote(q)) => {
                assert_eq!(q.symbol, "BBB");
                assert_eq!(q.ask_price, Some(dec!(1.5)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_non_json_and_untyped() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("hello"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(
            codec.decode(r#"[{"S":"AAA"}]"#),
            Err(CodecError::MissingType)
        ));
        assert!(matches!(codec.decode("[{"), Err(CodecError::Json(_))));
    }

    #[test]
    fn encodes_requests() {
        let json = JsonCodec::new()
            .encode(&SubscriptionRequest::subscribe(&["AAPL".to_string()]))
            .unwrap();
        assert_eq!(json, r#"{"action":"subscribe","quotes":["AAPL"]}"#);
    }
}
