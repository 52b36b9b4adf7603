use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::convert::MessageConverter;
use crate::message::{Destination, Message};
use crate::registry::ConnectionHandle;
use crate::transport::Transport;
use crate::Result;

/// Hook applied to a built message after conversion and before publish,
/// typically to set custom headers. An error here aborts the send.
pub trait MessagePostProcessor: Send + Sync {
    fn process(&self, message: Message) -> Result<Message>;
}

impl<F> MessagePostProcessor for F
where
    F: Fn(Message) -> Result<Message> + Send + Sync,
{
    fn process(&self, message: Message) -> Result<Message> {
        self(message)
    }
}

/// Builds and publishes exactly one message per invocation through the
/// transport. Retry policy, if any, belongs to the transport collaborator.
#[derive(Clone)]
pub struct MessageSender {
    transport: Arc<dyn Transport>,
}

impl MessageSender {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn send(
        &self,
        connection: &ConnectionHandle,
        destination: &Destination,
        message: Message,
        post_processor: Option<&dyn MessagePostProcessor>,
    ) -> Result<()> {
        let message = match post_processor {
            Some(processor) => processor.process(message)?,
            None => message,
        };
        debug!(destination = %destination, connection = %connection.id, "Sending message");
        self.transport
            .publish(
                connection,
                &destination.exchange,
                &destination.routing_key,
                message,
            )
            .await
    }

    /// Convert a domain payload into a wire message and send it. Conversion
    /// failure aborts before anything reaches the transport.
    pub async fn convert_and_send<C, P>(
        &self,
        connection: &ConnectionHandle,
        destination: &Destination,
        payload: &P,
        headers: Option<&HashMap<String, String>>,
        converter: &C,
        post_processor: Option<&dyn MessagePostProcessor>,
    ) -> Result<()>
    where
        C: MessageConverter,
        P: Serialize + ?Sized,
    {
        let message = converter.to_message(payload, headers)?;
        self.send(connection, destination, message, post_processor)
            .await
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}
