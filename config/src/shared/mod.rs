mod base;
mod destination;
mod pipeline;
mod replicator;
mod source;

pub use base::*;
pub use destination::*;
pub use pipeline::*;
pub use replicator::*;
pub use source::*;
