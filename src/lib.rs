pub mod client;
pub mod config;
pub mod heartbeat;
pub mod http;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod proposal;
pub mod relay;
pub mod server;
pub mod service;
pub mod sse;
pub mod store;
pub mod time;
pub mod validator;
