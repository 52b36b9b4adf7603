use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::message::Message;
use crate::{CourierError, Result};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Maps domain payloads to wire messages and back.
///
/// Both directions fail with [`CourierError::Conversion`]; a conversion
/// failure always aborts the surrounding send or receive, it never results
/// in a partial publish.
pub trait MessageConverter: Send + Sync {
    fn to_message<P>(&self, payload: &P, headers: Option<&HashMap<String, String>>) -> Result<Message>
    where
        P: Serialize + ?Sized;

    fn from_message<R>(&self, message: &Message) -> Result<R>
    where
        R: DeserializeOwned;
}

/// JSON converter: serializes payloads with `serde_json` and stamps the
/// `application/json` content type.
///
/// # Examples
///
/// ```
/// use courier_core::{JsonConverter, MessageConverter};
///
/// let converter = JsonConverter;
/// let message = converter.to_message(&vec![1u32, 2, 3], None).unwrap();
/// let back: Vec<u32> = converter.from_message(&message).unwrap();
/// assert_eq!(back, vec![1, 2, 3]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl MessageConverter for JsonConverter {
    fn to_message<P>(&self, payload: &P, headers: Option<&HashMap<String, String>>) -> Result<Message>
    where
        P: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| CourierError::Conversion(format!("serialize: {e}")))?;
        let mut message = Message::new(bytes).with_content_type(JSON_CONTENT_TYPE);
        if let Some(headers) = headers {
            message = message.with_headers(headers);
        }
        Ok(message)
    }

    fn from_message<R>(&self, message: &Message) -> Result<R>
    where
        R: DeserializeOwned,
    {
        if let Some(content_type) = &message.properties.content_type {
            if content_type != JSON_CONTENT_TYPE {
                return Err(CourierError::Conversion(format!(
                    "unsupported content type: {content_type}"
                )));
            }
        }
        serde_json::from_slice(&message.payload)
            .map_err(|e| CourierError::Conversion(format!("deserialize: {e}")))
    }
}
