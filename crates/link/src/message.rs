use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire-format envelope for every link request and reply.
///
/// Serialized with MessagePack. The `topic` names the operation, the
/// `correlation_id` pairs a reply with the request that caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Operation name (see [`crate::protocol`]).
    pub topic: String,

    /// MessagePack-encoded payload bytes.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    pub timestamp: DateTime<Utc>,

    /// Shared by a request and its reply.
    pub correlation_id: Uuid,

    /// Envelope schema version; peers reject versions they do not know.
    #[serde(default = "default_version")]
    pub version: u16,
}

pub const ENVELOPE_VERSION: u16 = 1;

fn default_version() -> u16 {
    ENVELOPE_VERSION
}

impl Message {
    /// New request with a fresh correlation id.
    pub fn request<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Self::build(topic.into(), payload, Uuid::new_v4())
    }

    /// Reply to `request`, reusing its correlation id.
    pub fn reply<T: Serialize>(
        request: &Message,
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Self::build(topic.into(), payload, request.correlation_id)
    }

    fn build<T: Serialize>(
        topic: String,
        payload: &T,
        correlation_id: Uuid,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Ok(Self {
            topic,
            payload: rmp_serde::to_vec_named(payload)?,
            timestamp: Utc::now(),
            correlation_id,
            version: ENVELOPE_VERSION,
        })
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.payload)
    }

    /// Serialize this entire envelope to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize an envelope from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Helper module for serde to handle `Vec<u8>` as raw bytes in MessagePack.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_keeps_correlation_id() {
        let req = Message::request("link.job.pull", &"fork-token-1".to_string()).unwrap();
        let rep = Message::reply(&req, "link.job.reply", &Option::<u32>::None).unwrap();
        assert_eq!(rep.correlation_id, req.correlation_id);
        assert_eq!(rep.version, ENVELOPE_VERSION);
        assert_eq!(rep.decode::<Option<u32>>().unwrap(), None);
    }

    #[test]
    fn envelope_survives_the_wire() {
        let msg = Message::request("link.result.push", &(7u64, "x".to_string())).unwrap();
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.topic, "link.result.push");
        assert_eq!(decoded.decode::<(u64, String)>().unwrap(), (7, "x".to_string()));
    }
}
