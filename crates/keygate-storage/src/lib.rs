pub mod entities;
pub mod merge;
pub mod seaorm;
pub mod storage;

pub use merge::{apply_patch, merge_fetched};
pub use seaorm::SeaOrmStorage;
pub use storage::{
    ApiKeyRecord, KeyStatus, KeyStatusCounts, ModelCapabilityRecord, ModelPatch, NewGroup,
    Storage, StorageError, StorageResult,
};
