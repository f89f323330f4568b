pub mod client;
pub mod connector;
pub mod pool;
pub mod resolver;
pub mod traced_io;
