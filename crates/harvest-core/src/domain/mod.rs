//! Domain model (ids, categories, job state, persisted records, errors).

pub mod category;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod job;
pub mod record;

pub use category::Category;
pub use envelope::CollectOutcome;
pub use errors::{ErrorKind, HarvestError};
pub use ids::{CollectionId, OwnerId, SessionId};
pub use job::{CollectionJob, JobStatus};
pub use record::{CollectionMetadata, CollectionPayload, CollectionRecord, is_placeholder, placeholder};
