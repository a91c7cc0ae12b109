pub mod chunk;
pub mod generation;
pub mod loaders;
pub mod provider;
pub mod question;

pub use chunk::ContentChunk;
pub use generation::{
    DeduplicationResult, DuplicateGroup, GenerationMetadata, GenerationRequest, GenerationResult,
};
pub use loaders::{load_request_from_text, load_request_from_toml};
pub use provider::{ProviderDescriptor, ProviderKind, RateLimit, LOCAL_PROVIDER_NAME};
pub use question::{content_hash, Difficulty, Question, QuestionMetadata, QuestionOption, QuestionType};
