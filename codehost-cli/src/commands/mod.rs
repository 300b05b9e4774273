//! CLI command implementations

pub mod key;
pub mod pr;
pub mod repo;
pub mod serve;

pub use key::KeyArgs;
pub use pr::PrArgs;
pub use repo::RepoArgs;
pub use serve::ServeArgs;
