//! Download jobs: the record every other component reads and mutates.

mod naming;
mod token;
mod types;

pub use naming::{compose_filename, generate_tag, sanitize_filename};
pub use token::{generate_job_id, generate_owner_token, tokens_match};
pub use types::*;
