pub mod services;

pub use services::{initialize_postgres_services, initialize_services, Backends};
