mod factory;
mod mongo_destination;

pub use factory::MongoSinkFactory;
pub use mongo_destination::{event_to_document, MongoEventLog, MongoSinkConfig};
