pub mod ach;
pub mod config;
pub mod error;
pub mod filetransfer;
pub mod handlers;
pub mod models;
pub mod observability;
pub mod services;
pub mod startup;

pub use startup::{AppState, Application};
