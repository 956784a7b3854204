#[cfg(feature = "browser")]
pub mod browser;
pub mod cleaner;
pub mod engine;
pub mod graphs;
pub mod llm;
pub mod loader;
pub mod search;

#[cfg(feature = "browser")]
pub use browser::BrowserLoader;
pub use cleaner::HtmdCleaner;
pub use engine::{EngineSettings, LlmEngine};
pub use llm::{ChatClient, ChatSettings};
pub use loader::PageLoader;
pub use search::SearchClient;
