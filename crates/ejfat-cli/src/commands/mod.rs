pub mod backend;
pub mod reserve;
pub mod serve;
