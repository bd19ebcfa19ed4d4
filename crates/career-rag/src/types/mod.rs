//! Core types for the chat pipeline

pub mod chunk;
pub mod collection;
pub mod messages;

pub use chunk::{metadata_from_json, EmbeddedChunk, EvidenceChunk, Metadata, MetadataValue, SourceTag};
pub use collection::{
    validate_collection_name, CollectionInfo, CreateCollectionRequest, IngestRequest,
    IngestResponse,
};
pub use messages::{ClientMessage, ServerEvent, Turn, UserIdentity, USER_MESSAGE_KIND};
