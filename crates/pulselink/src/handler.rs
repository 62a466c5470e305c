//! Handler registry for kind-based message dispatch.
//!
//! Handlers are looked up by [`Message::Kind`], so routing is a hash lookup on the message
//! discriminant. Each handler receives the message and the outbound queue of the connection
//! it arrived on, which is how replies are sent.

use std::collections::HashMap;
use std::sync::Arc;

use pulselink_proto::Message;

use crate::queue::MessageQueue;

/// A message handler. Returning an error invalidates (client) or is logged (server).
pub type Handler<M> = Arc<dyn Fn(M, &MessageQueue<M>) -> anyhow::Result<()> + Send + Sync>;

/// Registry mapping message kinds to handlers.
pub struct HandlerRegistry<M: Message> {
    handlers: HashMap<M::Kind, Handler<M>>,
}

impl<M: Message> HandlerRegistry<M> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn register<F>(&mut self, kind: M::Kind, handler: F)
    where
        F: Fn(M, &MessageQueue<M>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
    }

    /// Look up the handler for `kind`.
    ///
    /// Returns `None` if no handler is registered.
    pub fn get(&self, kind: M::Kind) -> Option<Handler<M>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: M::Kind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<M: Message> Default for HandlerRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> Clone for HandlerRegistry<M> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

/// Build a [`HandlerRegistry`] from `Kind => handler` pairs.
///
/// # Example
/// ```ignore
/// let registry = register_handlers! {
///     ChatKind::Say => |msg, replies| { replies.enqueue(msg); Ok(()) },
///     ChatKind::Leave => on_leave,
/// };
/// ```
#[macro_export]
macro_rules! register_handlers {
    ($($kind:expr => $handler:expr),* $(,)?) => {{
        let mut registry = $crate::handler::HandlerRegistry::new();
        $(
            registry.register($kind, $handler);
        )*
        registry
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Text, TextKind};

    #[test]
    fn macro_registers_every_kind() {
        let registry: HandlerRegistry<Text> = register_handlers! {
            TextKind::Plain => |msg: Text, replies: &MessageQueue<Text>| {
                replies.enqueue(Text(msg.0.chars().rev().collect()));
                Ok(())
            },
            TextKind::Command => |_: Text, _: &MessageQueue<Text>| anyhow::bail!("no commands"),
        };
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(TextKind::Command));

        let replies = MessageQueue::new();
        let handler = registry.get(TextKind::Plain).unwrap();
        handler(Text::from("abc"), &replies).unwrap();
        assert_eq!(replies.dequeue(), Some(Text::from("cba")));

        let failing = registry.get(TextKind::Command).unwrap();
        assert!(failing(Text::from("!x"), &replies).is_err());
    }

    #[test]
    fn missing_kind_has_no_handler() {
        let mut registry = HandlerRegistry::<Text>::new();
        assert!(registry.is_empty());
        registry.register(TextKind::Plain, |_, _| Ok(()));
        assert!(registry.get(TextKind::Command).is_none());
    }
}
