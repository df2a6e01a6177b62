pub mod config;
pub mod error;
pub mod paths;

pub use config::{BrowserConfig, ClientConfig, Config};
pub use error::{Error, Result};
pub use paths::Paths;
