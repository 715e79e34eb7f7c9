pub mod aggregate;
pub mod config;
pub mod error;
pub mod frame;
pub mod hypothesis;
pub mod io;
pub mod kpi;
pub mod overview;
pub mod plots;
pub mod stats;
pub mod types;
