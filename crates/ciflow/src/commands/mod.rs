pub mod monitor;
pub mod query;
pub mod state;
