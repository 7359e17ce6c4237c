//! Repositories owning all SQL against the engine database.

pub mod event_repository;
pub mod prompt_repository;
pub mod token_usage_repository;
pub mod workflow_repository;

pub use event_repository::EventRepository;
pub use prompt_repository::PromptRepository;
pub use token_usage_repository::TokenUsageRepository;
pub use workflow_repository::WorkflowRepository;
