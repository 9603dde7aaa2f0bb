//! Concrete PostgreSQL repository implementations.

pub mod category;
pub mod stream;
pub mod user;

pub use category::CategoryRepository;
pub use stream::StreamRepository;
pub use user::UserRepository;
