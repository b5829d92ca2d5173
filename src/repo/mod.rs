//! Repository access.

pub mod history;

pub use history::{collect_commits, open_repository, CommitSelection};
