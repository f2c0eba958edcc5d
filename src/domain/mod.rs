pub mod debounce;
pub mod models;
pub mod session;
pub mod settings;
pub mod store;
