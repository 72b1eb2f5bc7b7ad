mod chain_source;
mod notifier;
mod repository;

pub use chain_source::*;
pub use notifier::*;
pub use repository::*;
