pub mod connection;
pub mod dispatcher;
pub mod resolve;
pub mod typing;
