use std::collections::HashMap;

use futures_util::future::BoxFuture;
use tracing::{debug, error, warn};

use crate::bus::channel::Channel;
use crate::bus::message::Message;
use crate::bus::session::SessionContext;
use crate::error::HandlerResult;

/// A message handler. Handlers borrow the session context mutably, so within
/// one connection they always run one at a time, each to completion.
pub type HandlerFn =
    for<'a> fn(&'a mut SessionContext, &'a Message) -> BoxFuture<'a, HandlerResult>;

/// Routes inbound and loop-back messages to their handlers.
///
/// All subscriptions happen during startup, after which the router moves
/// behind an `Arc` and is never mutated again. Dispatch runs the handlers
/// registered for a `(type, channel)` pair in registration order; a message
/// type nobody subscribed to is dropped without an error.
#[derive(Default)]
pub struct MessageRouter {
    routes: HashMap<Channel, HashMap<String, Vec<HandlerFn>>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a message type on a channel.
    ///
    /// Panics if the channel does not accept subscriptions; that is a wiring
    /// mistake caught the first time the process starts.
    pub fn subscribe(&mut self, kind: &str, channel: Channel, handler: HandlerFn) {
        assert!(
            channel.accepts_subscriptions(),
            "handlers cannot subscribe to the {channel} channel"
        );
        self.routes
            .entry(channel)
            .or_default()
            .entry(kind.to_owned())
            .or_default()
            .push(handler);
    }

    pub fn handler_count(&self, kind: &str, channel: Channel) -> usize {
        self.routes
            .get(&channel)
            .and_then(|by_kind| by_kind.get(kind))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Total number of registered handlers, across all types and channels.
    pub fn len(&self) -> usize {
        self.routes
            .values()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every handler subscribed to this message on this channel.
    ///
    /// A failing handler only terminates its own run: protocol failures are
    /// answered with a notice on the originating connection, everything else
    /// is logged, and the remaining handlers still execute.
    pub async fn dispatch(&self, ctx: &mut SessionContext, channel: Channel, message: &Message) {
        let handlers = self
            .routes
            .get(&channel)
            .and_then(|by_kind| by_kind.get(message.kind()));
        let Some(handlers) = handlers else {
            debug!(kind = message.kind(), %channel, "dropping message with no subscribers");
            return;
        };

        for handler in handlers {
            if let Err(err) = handler(ctx, message).await {
                match err.to_notice(message.kind()) {
                    Some(notice) => {
                        warn!(kind = message.kind(), error = %err, "handler rejected message");
                        ctx.send_origin(notice);
                    }
                    None => {
                        error!(kind = message.kind(), error = %err, "handler failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lectern_core::{AppConfig, Database};
    use tokio::sync::mpsc;

    use super::*;
    use crate::bus::hub::RoomHub;
    use crate::bus::session::{ConnectionId, OutboundFrame};
    use crate::error::HandlerError;

    fn test_context() -> (SessionContext, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (loopback_tx, _loopback_rx) = mpsc::unbounded_channel();
        let ctx = SessionContext::new(
            ConnectionId::new(),
            Database::in_memory(),
            Arc::new(AppConfig::default()),
            RoomHub::new(),
            outbound_tx,
            loopback_tx,
        );
        (ctx, outbound_rx)
    }

    fn sent_kinds(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> Vec<String> {
        let mut kinds = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let OutboundFrame::Payload(message) = frame {
                kinds.push(message.kind().to_owned());
            }
        }
        kinds
    }

    fn send_first<'a>(
        ctx: &'a mut SessionContext,
        _message: &'a Message,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            ctx.send_origin(Message::new("drill.first"));
            Ok(())
        })
    }

    fn send_second<'a>(
        ctx: &'a mut SessionContext,
        _message: &'a Message,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            ctx.send_origin(Message::new("drill.second"));
            Ok(())
        })
    }

    fn needs_field<'a>(
        _ctx: &'a mut SessionContext,
        message: &'a Message,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            message.require_str("needed")?;
            Ok(())
        })
    }

    fn always_fails<'a>(
        _ctx: &'a mut SessionContext,
        _message: &'a Message,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move { Err(HandlerError::Internal(anyhow::anyhow!("boom"))) })
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let mut router = MessageRouter::new();
        router.subscribe("drill.run", Channel::Origin, send_first);
        router.subscribe("drill.run", Channel::Origin, send_second);

        let (mut ctx, mut outbound_rx) = test_context();
        router
            .dispatch(&mut ctx, Channel::Origin, &Message::new("drill.run"))
            .await;

        assert_eq!(sent_kinds(&mut outbound_rx), ["drill.first", "drill.second"]);
    }

    #[tokio::test]
    async fn unsubscribed_message_types_are_dropped_silently() {
        let mut router = MessageRouter::new();
        router.subscribe("drill.run", Channel::Origin, send_first);

        let (mut ctx, mut outbound_rx) = test_context();
        router
            .dispatch(&mut ctx, Channel::Origin, &Message::new("nobody.listens"))
            .await;

        assert!(sent_kinds(&mut outbound_rx).is_empty());
    }

    #[tokio::test]
    async fn subscriptions_are_scoped_to_their_channel() {
        let mut router = MessageRouter::new();
        router.subscribe("drill.run", Channel::Loopback, send_first);

        let (mut ctx, mut outbound_rx) = test_context();
        router
            .dispatch(&mut ctx, Channel::Origin, &Message::new("drill.run"))
            .await;
        assert!(sent_kinds(&mut outbound_rx).is_empty());

        router
            .dispatch(&mut ctx, Channel::Loopback, &Message::new("drill.run"))
            .await;
        assert_eq!(sent_kinds(&mut outbound_rx), ["drill.first"]);
    }

    #[tokio::test]
    async fn malformed_payloads_are_answered_with_a_notice() {
        let mut router = MessageRouter::new();
        router.subscribe("drill.strict", Channel::Origin, needs_field);

        let (mut ctx, mut outbound_rx) = test_context();
        router
            .dispatch(&mut ctx, Channel::Origin, &Message::new("drill.strict"))
            .await;

        let frame = outbound_rx.try_recv().unwrap();
        let OutboundFrame::Payload(notice) = frame else {
            panic!("expected a payload frame");
        };
        assert_eq!(notice.kind(), "error.malformedMessage");
        assert_eq!(notice.opt_str("offendingType"), Some("drill.strict"));
        assert_eq!(notice.opt_str("missingField"), Some("needed"));
    }

    #[tokio::test]
    async fn a_failing_handler_does_not_stop_the_rest() {
        let mut router = MessageRouter::new();
        router.subscribe("drill.run", Channel::Origin, always_fails);
        router.subscribe("drill.run", Channel::Origin, send_second);

        let (mut ctx, mut outbound_rx) = test_context();
        router
            .dispatch(&mut ctx, Channel::Origin, &Message::new("drill.run"))
            .await;

        assert_eq!(sent_kinds(&mut outbound_rx), ["drill.second"]);
    }

    #[test]
    #[should_panic(expected = "cannot subscribe")]
    fn subscribing_to_the_room_channel_is_rejected() {
        let mut router = MessageRouter::new();
        router.subscribe("drill.run", Channel::Room, send_first);
    }
}
