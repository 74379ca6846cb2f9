//! Persistence layer.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{NewCourse, NewStudent, Store};
