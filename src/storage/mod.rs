mod changes;
mod runs;
mod schema;
mod snapshots;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, LoggedChange, RunRecord};
