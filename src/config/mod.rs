pub mod loader;
pub mod schema;

pub use loader::{builtin, load_from_path, load_from_str, ConfigError};
pub use schema::{
    HookConfig, IncludeRule, LiteralRule, Mains, Metadata, PlatformOnly, Samples, StagedFile,
    Staging, ValidationError, ValidationIssue,
};
