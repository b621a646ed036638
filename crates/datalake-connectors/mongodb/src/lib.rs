mod documents;
mod lookup;
mod mongo_connector;
mod readiness;

pub use documents::{decode_document, key_to_string};
pub use lookup::MongoCustomerLookup;
pub use mongo_connector::{CollectionNames, MongoChangeFeed, MongoChangeFeedSource, MongoConfig};
pub use readiness::MongoReadiness;
