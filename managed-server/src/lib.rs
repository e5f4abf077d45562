pub mod client;
pub mod driver;
pub mod error;
pub mod floating_ip;
pub mod model;
pub mod operator;
pub mod server;
