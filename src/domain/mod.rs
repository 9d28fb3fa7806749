pub mod address;
pub mod models;
pub mod settings;
