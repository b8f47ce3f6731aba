pub mod accounts;
pub mod events;
pub mod liveness;
pub mod node;
pub mod registry;
pub mod routes;
pub mod state;
