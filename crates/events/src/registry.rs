//! Handler registry.
//!
//! Maps stable type names to type-erased invocation functions. Dispatch is a
//! lookup on the envelope's type tag; the registered wrapper decodes the
//! payload into the handler's concrete message type, so the dispatcher never
//! deals with concrete types itself.
//!
//! The registry is assembled once through [`RegistryBuilder`] and is immutable
//! afterwards. It is shared as `Arc<HandlerRegistry>` and needs no locking.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::codec::{Codec, CodecError};
use crate::context::HandlerContext;
use crate::envelope::Envelope;
use crate::handler::{CommandHandler, EventHandler};
use crate::message::{Command, Event, MessageKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("command {message_type} already handled by `{existing}` (rejected `{rejected}`)")]
    DuplicateCommandHandler {
        message_type: &'static str,
        existing: String,
        rejected: String,
    },

    #[error("event handler `{name}` already registered for {message_type}")]
    DuplicateHandlerName {
        name: String,
        message_type: &'static str,
    },

    #[error("handler name must not be empty ({message_type})")]
    EmptyHandlerName { message_type: &'static str },

    #[error("no {kind} handler registered for {message_type}")]
    NotFound {
        kind: MessageKind,
        message_type: String,
    },
}

/// A handler call ready to be awaited.
pub type Invocation = BoxFuture<'static, anyhow::Result<()>>;

/// Type-erased entry point of a registered handler.
pub trait Invoker: Send + Sync {
    /// Decode `envelope` and bind it to the handler.
    ///
    /// Decoding happens here, before anything runs, so a malformed payload
    /// never reaches business code.
    fn prepare(&self, ctx: HandlerContext, envelope: &Envelope) -> Result<Invocation, CodecError>;
}

struct CommandInvoker<C, H> {
    handler: Arc<H>,
    codec: Codec,
    _message: PhantomData<fn() -> C>,
}

impl<C, H> Invoker for CommandInvoker<C, H>
where
    C: Command,
    H: CommandHandler<C>,
{
    fn prepare(&self, ctx: HandlerContext, envelope: &Envelope) -> Result<Invocation, CodecError> {
        let command: C = self.codec.decode(envelope)?;
        let handler = Arc::clone(&self.handler);
        Ok(Box::pin(async move { handler.handle(&ctx, command).await }))
    }
}

struct EventInvoker<E, H> {
    handler: Arc<H>,
    codec: Codec,
    _message: PhantomData<fn() -> E>,
}

impl<E, H> Invoker for EventInvoker<E, H>
where
    E: Event,
    H: EventHandler<E>,
{
    fn prepare(&self, ctx: HandlerContext, envelope: &Envelope) -> Result<Invocation, CodecError> {
        let event: E = self.codec.decode(envelope)?;
        let handler = Arc::clone(&self.handler);
        Ok(Box::pin(async move { handler.handle(&ctx, event).await }))
    }
}

/// Binds a handler name to a message type and its invoker.
#[derive(Clone)]
pub struct HandlerRegistration {
    name: String,
    message_type: &'static str,
    kind: MessageKind,
    invoker: Arc<dyn Invoker>,
}

impl HandlerRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn invoker(&self) -> &Arc<dyn Invoker> {
        &self.invoker
    }
}

impl core::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("name", &self.name)
            .field("message_type", &self.message_type)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Immutable lookup table from type name to handler(s).
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    commands: BTreeMap<&'static str, HandlerRegistration>,
    events: BTreeMap<&'static str, Vec<HandlerRegistration>>,
}

impl HandlerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The one handler for a command type; [`RegistryError::NotFound`] if
    /// none was registered.
    pub fn command_handler(&self, message_type: &str) -> Result<&HandlerRegistration, RegistryError> {
        self.commands
            .get(message_type)
            .ok_or_else(|| RegistryError::NotFound {
                kind: MessageKind::Command,
                message_type: message_type.to_string(),
            })
    }

    pub fn has_command_handler(&self, message_type: &str) -> bool {
        self.commands.contains_key(message_type)
    }

    /// Event handlers for `message_type`, in registration order. An event
    /// nobody listens to has none, which is not an error.
    pub fn event_handlers(&self, message_type: &str) -> &[HandlerRegistration] {
        self.events
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn command_registrations(&self) -> impl Iterator<Item = &HandlerRegistration> {
        self.commands.values()
    }

    pub fn event_registrations(&self) -> impl Iterator<Item = &HandlerRegistration> {
        self.events.values().flatten()
    }
}

/// Collects registrations at startup.
///
/// Configuration errors are reported at the offending `register_*` call so
/// the process refuses to start with an ambiguous routing table.
#[derive(Default)]
pub struct RegistryBuilder {
    registry: HandlerRegistry,
}

impl RegistryBuilder {
    pub fn register_command_handler<C, H>(&mut self, handler: H) -> Result<&mut Self, RegistryError>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let handler = Arc::new(handler);
        let name = handler.name().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyHandlerName {
                message_type: C::MESSAGE_TYPE,
            });
        }

        if let Some(existing) = self.registry.commands.get(C::MESSAGE_TYPE) {
            return Err(RegistryError::DuplicateCommandHandler {
                message_type: C::MESSAGE_TYPE,
                existing: existing.name.clone(),
                rejected: name,
            });
        }

        tracing::debug!(handler = %name, message_type = C::MESSAGE_TYPE, "command handler registered");
        self.registry.commands.insert(
            C::MESSAGE_TYPE,
            HandlerRegistration {
                name,
                message_type: C::MESSAGE_TYPE,
                kind: MessageKind::Command,
                invoker: Arc::new(CommandInvoker::<C, H> {
                    handler,
                    codec: Codec::new(),
                    _message: PhantomData,
                }),
            },
        );
        Ok(self)
    }

    pub fn register_event_handler<E, H>(&mut self, handler: H) -> Result<&mut Self, RegistryError>
    where
        E: Event,
        H: EventHandler<E>,
    {
        let handler = Arc::new(handler);
        let name = handler.name().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyHandlerName {
                message_type: E::MESSAGE_TYPE,
            });
        }

        let handlers = self.registry.events.entry(E::MESSAGE_TYPE).or_default();
        if handlers.iter().any(|r| r.name == name) {
            return Err(RegistryError::DuplicateHandlerName {
                name,
                message_type: E::MESSAGE_TYPE,
            });
        }

        tracing::debug!(handler = %name, message_type = E::MESSAGE_TYPE, "event handler registered");
        handlers.push(HandlerRegistration {
            name,
            message_type: E::MESSAGE_TYPE,
            kind: MessageKind::Event,
            invoker: Arc::new(EventInvoker::<E, H> {
                handler,
                codec: Codec::new(),
                _message: PhantomData,
            }),
        });
        Ok(self)
    }

    pub fn build(self) -> Arc<HandlerRegistry> {
        Arc::new(self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Counting, Ping, Pinged, Pong, context_for};
    use crate::codec::Lineage;

    #[test]
    fn second_command_handler_is_rejected() {
        let mut builder = HandlerRegistry::builder();
        builder
            .register_command_handler::<Ping, _>(Counting::new("first"))
            .unwrap();

        let err = builder
            .register_command_handler::<Ping, _>(Counting::new("second"))
            .err()
            .unwrap();

        assert_eq!(
            err,
            RegistryError::DuplicateCommandHandler {
                message_type: "test.Ping",
                existing: "first".into(),
                rejected: "second".into(),
            }
        );
    }

    #[test]
    fn event_handler_names_are_unique_per_type() {
        let mut builder = HandlerRegistry::builder();
        builder
            .register_event_handler::<Pinged, _>(Counting::new("audit"))
            .unwrap()
            .register_event_handler::<Pinged, _>(Counting::new("report"))
            .unwrap()
            // Same name on a different type is fine.
            .register_event_handler::<Pong, _>(Counting::new("audit"))
            .unwrap();

        let err = builder
            .register_event_handler::<Pinged, _>(Counting::new("audit"))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::DuplicateHandlerName { ref name, .. } if name == "audit"));

        let registry = builder.build();
        let names: Vec<_> = registry
            .event_handlers("test.Pinged")
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, vec!["audit", "report"]);
    }

    #[test]
    fn empty_names_are_rejected() {
        let err = HandlerRegistry::builder()
            .register_command_handler::<Ping, _>(Counting::new(""))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::EmptyHandlerName { .. }));
    }

    #[test]
    fn missing_commands_are_errors_but_silent_events_are_not() {
        let registry = HandlerRegistry::builder().build();

        assert!(registry.event_handlers("test.Pinged").is_empty());
        assert!(matches!(
            registry.command_handler("test.Ping"),
            Err(RegistryError::NotFound { kind: MessageKind::Command, .. })
        ));
    }

    #[tokio::test]
    async fn invoker_decodes_and_calls_the_handler() {
        let handler = Arc::new(Counting::new("ping"));
        let mut builder = HandlerRegistry::builder();
        builder
            .register_command_handler::<Ping, _>(Arc::clone(&handler))
            .unwrap();
        let registry = builder.build();

        let envelope = Codec.encode(&Ping { seq: 7 }, Lineage::Root).unwrap();
        let registration = registry.command_handler("test.Ping").unwrap();
        let invocation = registration
            .invoker()
            .prepare(context_for(&envelope), &envelope)
            .unwrap();
        invocation.await.unwrap();

        assert_eq!(handler.seen(), vec![7]);
    }

    #[test]
    fn invoker_rejects_foreign_envelopes() {
        let mut builder = HandlerRegistry::builder();
        builder
            .register_command_handler::<Ping, _>(Counting::new("ping"))
            .unwrap();
        let registry = builder.build();

        let envelope = Codec.encode(&Pong { seq: 1 }, Lineage::Root).unwrap();
        let result = registry
            .command_handler("test.Ping")
            .unwrap()
            .invoker()
            .prepare(context_for(&envelope), &envelope);
        assert!(matches!(result, Err(CodecError::TypeMismatch { .. })));
    }
}
