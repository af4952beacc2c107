pub mod applicator;
pub mod loader;
pub mod schema;

pub use applicator::{ApplicationError, FilePlan, FileReport, PatchOutcome, PatchReport};
pub use loader::{load_dir, load_from_path, load_from_str, ConfigError, PatchSet};
pub use schema::{FilePatch, Patch, ValidationError, ValidationIssue};
