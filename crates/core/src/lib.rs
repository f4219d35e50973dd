pub mod autosave;
pub mod config;
pub mod confirmation;
pub mod execution;
pub mod history;
pub mod notifications;
pub mod pagination;
pub mod query_result;
pub mod registry;
pub mod safety;
pub mod schema;
pub mod session;
pub mod tabs;
pub mod validation;

/// Integer reference to an externally managed database connection.
pub type ConnectionId = i64;
