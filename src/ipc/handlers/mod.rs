pub mod attendance;
pub mod auth;
pub mod classes;
pub mod core;
pub mod scan;
pub mod scan_types;
pub mod students;
