use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

use courier_core::{CorrelationId, MessageId};

use crate::codec::CodecError;

/// Well-known metadata keys written on every envelope.
pub mod metadata {
    pub const MESSAGE_ID: &str = "message_id";
    pub const CORRELATION_ID: &str = "correlation_id";
    pub const CAUSATION_ID: &str = "causation_id";
    pub const PUBLISHED_AT: &str = "published_at";
    pub const CONTENT_TYPE: &str = "content_type";
}

/// Wire form of a message.
///
/// On the broker an envelope is the triple `(message_type, payload, metadata)`
/// where metadata is a flat string map. In-process the well-known metadata
/// entries are lifted into typed fields; anything else is kept in `headers`.
///
/// Notes:
/// - `message_type` is the dispatch key; routing never looks at the payload.
/// - `payload` is opaque bytes produced by the [`Codec`](crate::Codec).
/// - Envelopes are immutable once built; redeliveries carry the same envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    message_id: MessageId,
    correlation_id: CorrelationId,
    causation_id: Option<MessageId>,
    message_type: String,
    published_at: DateTime<Utc>,
    payload: Vec<u8>,
    headers: BTreeMap<String, String>,
}

impl Envelope {
    pub fn new(
        message_id: MessageId,
        correlation_id: CorrelationId,
        causation_id: Option<MessageId>,
        message_type: impl Into<String>,
        published_at: DateTime<Utc>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_id,
            correlation_id,
            causation_id,
            message_type: message_type.into(),
            published_at,
            payload,
            headers: BTreeMap::new(),
        }
    }

    /// Attach an extra metadata entry.
    ///
    /// Well-known keys are owned by the typed fields and cannot be overridden here.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if !is_reserved(&key) {
            self.headers.insert(key, value.into());
        }
        self
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn causation_id(&self) -> Option<MessageId> {
        self.causation_id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Flatten into the wire metadata map (typed fields + extra headers).
    pub fn metadata(&self) -> BTreeMap<String, String> {
        let mut map = self.headers.clone();
        map.insert(metadata::MESSAGE_ID.to_string(), self.message_id.to_string());
        map.insert(
            metadata::CORRELATION_ID.to_string(),
            self.correlation_id.to_string(),
        );
        if let Some(causation) = self.causation_id {
            map.insert(metadata::CAUSATION_ID.to_string(), causation.to_string());
        }
        map.insert(
            metadata::PUBLISHED_AT.to_string(),
            self.published_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        );
        map
    }

    /// Rebuild an envelope from its wire triple.
    ///
    /// Fails with [`CodecError::MalformedEnvelope`] when a well-known entry is
    /// missing or unparsable.
    pub fn from_wire(
        message_type: impl Into<String>,
        payload: Vec<u8>,
        mut metadata: BTreeMap<String, String>,
    ) -> Result<Self, CodecError> {
        let message_id = take_parsed(&mut metadata, metadata::MESSAGE_ID)?;
        let correlation_id = take_parsed(&mut metadata, metadata::CORRELATION_ID)?;
        let causation_id = match metadata.remove(metadata::CAUSATION_ID) {
            Some(raw) => Some(raw.parse().map_err(|e| {
                CodecError::MalformedEnvelope(format!("{}: {e}", metadata::CAUSATION_ID))
            })?),
            None => None,
        };
        let published_at = metadata
            .remove(metadata::PUBLISHED_AT)
            .ok_or_else(|| missing(metadata::PUBLISHED_AT))
            .and_then(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        CodecError::MalformedEnvelope(format!("{}: {e}", metadata::PUBLISHED_AT))
                    })
            })?;

        Ok(Self {
            message_id,
            correlation_id,
            causation_id,
            message_type: message_type.into(),
            published_at,
            payload,
            headers: metadata,
        })
    }
}

fn is_reserved(key: &str) -> bool {
    matches!(
        key,
        metadata::MESSAGE_ID
            | metadata::CORRELATION_ID
            | metadata::CAUSATION_ID
            | metadata::PUBLISHED_AT
    )
}

fn missing(key: &str) -> CodecError {
    CodecError::MalformedEnvelope(format!("missing metadata entry `{key}`"))
}

fn take_parsed<T>(metadata: &mut BTreeMap<String, String>, key: &str) -> Result<T, CodecError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    let raw = metadata.remove(key).ok_or_else(|| missing(key))?;
    raw.parse()
        .map_err(|e| CodecError::MalformedEnvelope(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        let id = MessageId::new();
        Envelope::new(
            id,
            CorrelationId::root(id),
            None,
            "test.Ping",
            Utc::now(),
            b"{}".to_vec(),
        )
        .with_header(metadata::CONTENT_TYPE, "application/json")
    }

    #[test]
    fn wire_metadata_round_trips() {
        let original = sample();
        let rebuilt = Envelope::from_wire(
            original.message_type(),
            original.payload().to_vec(),
            original.metadata(),
        )
        .unwrap();

        assert_eq!(rebuilt.message_id(), original.message_id());
        assert_eq!(rebuilt.correlation_id(), original.correlation_id());
        assert_eq!(rebuilt.header(metadata::CONTENT_TYPE), Some("application/json"));
        // Microsecond precision on the wire.
        assert_eq!(
            rebuilt.published_at().timestamp_micros(),
            original.published_at().timestamp_micros()
        );
    }

    #[test]
    fn missing_correlation_is_malformed() {
        let mut meta = sample().metadata();
        meta.remove(metadata::CORRELATION_ID);

        let err = Envelope::from_wire("test.Ping", vec![], meta).unwrap_err();
        assert!(matches!(err, CodecError::MalformedEnvelope(msg) if msg.contains("correlation_id")));
    }

    #[test]
    fn reserved_headers_are_ignored() {
        let env = sample().with_header(metadata::MESSAGE_ID, "spoofed");
        assert_eq!(
            env.metadata().get(metadata::MESSAGE_ID).map(String::as_str),
            Some(env.message_id().to_string().as_str())
        );
    }
}
