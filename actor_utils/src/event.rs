use fvm_ipld_encoding::tuple::{Deserialize_tuple, Serialize_tuple};
use fvm_ipld_encoding::{Error as IpldError, RawBytes};
use fvm_shared::ActorID;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A named, CBOR-encoded record emitted by an actor as a side channel to its return value
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct ActorEvent {
    /// Event name, e.g. "Transfer"
    pub name: String,
    /// Encoded event body
    pub payload: RawBytes,
}

impl ActorEvent {
    /// Encodes `payload` as the body of a new event
    pub fn new<T: Serialize>(name: &str, payload: &T) -> Result<Self, IpldError> {
        Ok(Self { name: name.to_owned(), payload: RawBytes::serialize(payload)? })
    }

    /// Decodes the event body
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, IpldError> {
        self.payload.deserialize()
    }
}

/// An event as recorded by the execution environment, stamped with the emitting actor
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct StampedEvent {
    pub emitter: ActorID,
    pub event: ActorEvent,
}
