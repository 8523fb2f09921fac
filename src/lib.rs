pub mod linkcode;
pub mod server;
pub mod storage;
