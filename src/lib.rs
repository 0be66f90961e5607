pub mod cache;
pub mod config;
pub mod dependencies;
pub mod discovery;
pub mod local_source;
pub mod locals;
pub mod output;
pub mod parser;
pub mod processor;
pub mod project;
pub mod resolver;

#[cfg(test)]
mod test_support;

// Re-export main types
pub use config::GenerateConfig;
pub use output::AtlantisConfig;
pub use processor::{generate, GenerateError};
pub use project::Project;
