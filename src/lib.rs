pub mod config;
pub mod error;
pub mod functions;
pub mod interpreter;
pub mod models;
pub mod providers;
pub mod records;
pub mod services;
pub mod transitions;
