pub mod handlers;
pub mod index_ops;
pub mod lifecycle;
pub mod recovery;
pub mod snapshot;
