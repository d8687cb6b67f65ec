pub mod endpoint;
pub mod route;
