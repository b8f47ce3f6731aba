pub mod chunk;
pub mod client;
pub mod health;
pub mod replicate;
pub mod routes;
pub mod state;
pub mod store;
