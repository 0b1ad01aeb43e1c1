//! JSON codec between typed messages and [`Envelope`]s.

use chrono::Utc;
use thiserror::Error;

use courier_core::{CorrelationId, MessageId};

use crate::envelope::{Envelope, metadata};
use crate::message::Message;

/// Content type written by [`Codec`].
pub const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload could not be serialized.
    #[error("failed to encode {message_type}: {source}")]
    Encode {
        message_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The payload does not match the schema of its declared type.
    #[error("failed to decode {message_type}: {source}")]
    Decode {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// The envelope carries a type name other than the one being decoded.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    /// The envelope was produced by a codec this process does not speak.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// Required envelope metadata is missing or unparsable.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

impl CodecError {
    /// Decode-side failures are never retried; the envelope is dead-lettered.
    pub fn is_decode(&self) -> bool {
        !matches!(self, CodecError::Encode { .. })
    }
}

/// Where a new message sits in its causal chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Lineage {
    /// First message of a new chain (fresh correlation id).
    #[default]
    Root,
    /// Emitted while handling another message.
    CausedBy {
        correlation_id: CorrelationId,
        causation_id: MessageId,
    },
}

impl Lineage {
    /// Lineage for messages emitted while handling `envelope`.
    pub fn caused_by(envelope: &Envelope) -> Self {
        Lineage::CausedBy {
            correlation_id: envelope.correlation_id(),
            causation_id: envelope.message_id(),
        }
    }
}

/// Serializes messages as JSON payloads tagged with their stable type name.
///
/// - `encode` never inspects registrations; any [`Message`] can be encoded.
/// - `decode::<M>` checks the type tag first, then the payload schema.
#[derive(Debug, Copy, Clone, Default)]
pub struct Codec;

impl Codec {
    pub fn new() -> Self {
        Self
    }

    pub fn encode<M: Message>(&self, message: &M, lineage: Lineage) -> Result<Envelope, CodecError> {
        let payload = serde_json::to_vec(message).map_err(|source| CodecError::Encode {
            message_type: M::MESSAGE_TYPE,
            source,
        })?;

        let message_id = MessageId::new();
        let (correlation_id, causation_id) = match lineage {
            Lineage::Root => (CorrelationId::root(message_id), None),
            Lineage::CausedBy {
                correlation_id,
                causation_id,
            } => (correlation_id, Some(causation_id)),
        };

        Ok(Envelope::new(
            message_id,
            correlation_id,
            causation_id,
            M::MESSAGE_TYPE,
            Utc::now(),
            payload,
        )
        .with_header(metadata::CONTENT_TYPE, CONTENT_TYPE_JSON))
    }

    pub fn decode<M: Message>(&self, envelope: &Envelope) -> Result<M, CodecError> {
        if envelope.message_type() != M::MESSAGE_TYPE {
            return Err(CodecError::TypeMismatch {
                expected: M::MESSAGE_TYPE,
                found: envelope.message_type().to_string(),
            });
        }

        // Envelopes without a content type predate the header; treat them as JSON.
        if let Some(content_type) = envelope.header(metadata::CONTENT_TYPE) {
            if content_type != CONTENT_TYPE_JSON {
                return Err(CodecError::UnsupportedContentType(content_type.to_string()));
            }
        }

        serde_json::from_slice(envelope.payload()).map_err(|source| CodecError::Decode {
            message_type: envelope.message_type().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Command, Event};
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reserve {
        room: String,
        nights: u32,
        note: Option<String>,
    }

    impl Message for Reserve {
        const MESSAGE_TYPE: &'static str = "test.Reserve";
    }
    impl Command for Reserve {}

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reserved {
        room: String,
    }

    impl Message for Reserved {
        const MESSAGE_TYPE: &'static str = "test.Reserved";
    }
    impl Event for Reserved {}

    #[test]
    fn envelope_carries_type_and_content_type() {
        let env = Codec
            .encode(&Reserved { room: "12".into() }, Lineage::Root)
            .unwrap();

        assert_eq!(env.message_type(), "test.Reserved");
        assert_eq!(env.header(metadata::CONTENT_TYPE), Some(CONTENT_TYPE_JSON));
        assert_eq!(env.causation_id(), None);
        assert_eq!(env.correlation_id().as_uuid(), env.message_id().as_uuid());
    }

    #[test]
    fn caused_by_keeps_the_chain() {
        let parent = Codec
            .encode(&Reserved { room: "1".into() }, Lineage::Root)
            .unwrap();
        let child = Codec
            .encode(
                &Reserve {
                    room: "1".into(),
                    nights: 2,
                    note: None,
                },
                Lineage::caused_by(&parent),
            )
            .unwrap();

        assert_eq!(child.correlation_id(), parent.correlation_id());
        assert_eq!(child.causation_id(), Some(parent.message_id()));
        assert_ne!(child.message_id(), parent.message_id());
    }

    #[test]
    fn decoding_as_the_wrong_type_fails() {
        let env = Codec
            .encode(&Reserved { room: "12".into() }, Lineage::Root)
            .unwrap();

        let err = Codec.decode::<Reserve>(&env).unwrap_err();
        assert!(matches!(
            err,
            CodecError::TypeMismatch { expected: "test.Reserve", ref found } if found == "test.Reserved"
        ));
        assert!(err.is_decode());
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let good = Codec
            .encode(&Reserved { room: "12".into() }, Lineage::Root)
            .unwrap();
        let bad = Envelope::new(
            good.message_id(),
            good.correlation_id(),
            None,
            "test.Reserved",
            good.published_at(),
            b"{\"room\": 12".to_vec(),
        );

        assert!(matches!(
            Codec.decode::<Reserved>(&bad),
            Err(CodecError::Decode { .. })
        ));
    }

    #[test]
    fn foreign_content_type_is_rejected() {
        let good = Codec
            .encode(&Reserved { room: "12".into() }, Lineage::Root)
            .unwrap();
        let foreign = Envelope::new(
            good.message_id(),
            good.correlation_id(),
            None,
            "test.Reserved",
            good.published_at(),
            good.payload().to_vec(),
        )
        .with_header(metadata::CONTENT_TYPE, "application/x-protobuf");

        assert!(matches!(
            Codec.decode::<Reserved>(&foreign),
            Err(CodecError::UnsupportedContentType(_))
        ));
    }

    proptest! {
        /// Property: decode(encode(m)) == m, through the wire metadata as well.
        #[test]
        fn encode_then_decode_is_identity(
            room in "[0-9A-Za-z]{1,8}",
            nights in 0u32..365,
            note in proptest::option::of(".{0,40}"),
        ) {
            let original = Reserve { room, nights, note };
            let env = Codec.encode(&original, Lineage::Root).unwrap();
            let wire = Envelope::from_wire(
                env.message_type(),
                env.payload().to_vec(),
                env.metadata(),
            )
            .unwrap();

            prop_assert_eq!(wire.message_type(), Reserve::MESSAGE_TYPE);
            prop_assert_eq!(Codec.decode::<Reserve>(&wire).unwrap(), original);
        }
    }
}
