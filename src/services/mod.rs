pub mod deduplicator;
pub mod preprocessor;
pub mod prompt_builder;
pub mod quality_validator;
pub mod response_parser;
pub mod stopwords;
pub mod text_similarity;

pub use deduplicator::Deduplicator;
pub use preprocessor::{ContentPreprocessor, PreparedContent};
pub use prompt_builder::PromptInput;
pub use quality_validator::{QualityValidator, ValidationReport};
pub use response_parser::ResponseParser;
