// busmod-api: Event bus client for busmod modules (codec, routing, transport)

pub mod codec;
pub mod error;
pub mod event;
pub mod harness;
pub mod router;
pub mod topic;
pub mod transport;

pub use codec::EventCodec;
pub use error::{DecodeError, Error};
pub use event::{Event, Payload};
pub use harness::{Harness, Recorder};
pub use router::{EventRouter, Subscription, SUBSCRIBER_QUEUE_CAPACITY};
pub use topic::{TopicPattern, matches};
pub use transport::BusClient;
