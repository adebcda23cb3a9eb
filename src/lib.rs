pub mod cache;
pub mod mem;
pub mod sim;
