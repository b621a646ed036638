mod error;
mod factory;
mod feed;
mod lookup;
pub mod memory;
mod model;
mod readiness;
mod registry;
mod resolver;
mod sink;
mod supervisor;
mod writer;

pub use error::{Error, Result};
pub use factory::{MemorySinkFactory, SinkFactory};
pub use feed::{ChangeFeed, ChangeFeedSource, FeedStatus};
pub use lookup::CustomerLookup;
pub use model::{
    ChangeEvent, Collection, Customer, CustomerSummary, DataLakeEvent, EnrichedOrderSnapshot,
    EventMetadata, GroupCount, Item, LakeStatistics, LineItem, Operation, Order, RecentEvent,
    SourceDocument, CUSTOMER_NOT_FOUND_EMAIL, CUSTOMER_NOT_FOUND_NAME, EVENT_ORIGIN,
};
pub use readiness::{ReadinessGate, ReadinessReport};
pub use registry::Registry;
pub use resolver::DenormalizationResolver;
pub use sink::EventLogSink;
pub use supervisor::{
    ChangeStreamSupervisor, LoopState, LoopStatus, SupervisorReport, SupervisorSettings,
};
pub use writer::{local_hostname, EventLogWriter, WriterSettings};
