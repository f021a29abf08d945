pub mod connection;
pub mod proxy;
pub mod worker;
