//! Remote collaborators for listing and fetching scan files.

pub mod github;

pub use github::GitHubSource;
