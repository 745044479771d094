pub mod errors;
pub mod models;
pub mod registry;
pub mod resolver;
pub mod settings;
pub mod values;
