pub mod connection;
pub mod dispatcher;
pub mod notify;
pub mod relay;
