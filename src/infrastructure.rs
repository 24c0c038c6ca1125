//! Infrastructure layer - configuration, logging and the WebDriver
//! implementation of the browser capability.

pub mod config;
pub mod logging;
pub mod webdriver;

pub use config::{AppConfig, ConfigManager};
pub use webdriver::WebDriverBrowser;
