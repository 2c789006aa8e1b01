//! Typed publish/subscribe bus: many-to-many delivery of named, typed topic
//! data between participants in a logical domain.

pub mod data_reader;
pub mod data_writer;
pub mod publisher;
pub mod service;
pub mod subscriber;
pub mod topic;
pub mod transport;

pub use data_reader::DataReader;
pub use data_writer::DataWriter;
pub use publisher::Publisher;
pub use service::Service;
pub use subscriber::Subscriber;
pub use topic::{Durability, TopicInfo};
pub use transport::PubSubTransport;

pub use crate::error::pubsub::{Error, Result};
