//! Live stream domain entities.

pub mod model;
pub mod row;
pub mod source;

pub use model::{LiveStream, StreamCategory, StreamOwner};
pub use row::{NewStream, StreamRow};
pub use source::StreamSource;
