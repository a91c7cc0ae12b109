pub mod toml_loader;

pub use toml_loader::{load_request_from_text, load_request_from_toml};
