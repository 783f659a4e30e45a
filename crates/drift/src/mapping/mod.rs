//! FollowTheMoney entities to canonical records.
//!
//! Attachment entities (addresses, identifications, relationships) are
//! indexed by the principal they describe; each principal is then
//! transformed into one [`CanonicalRecord`] using that index.

mod index;
mod reader;
mod record;
mod transform;

pub use index::RelationshipIndex;
pub use reader::{
    EntitySource, FileSource, MalformedPolicy, Mapper, MappingOptions, MappingReport,
    MemorySource, SourceOrdering,
};
pub use record::{CanonicalRecord, single};
pub use transform::{GenderPolicy, Transformer};
