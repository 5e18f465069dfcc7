pub mod command_routes;
pub mod extract;
pub mod listener_routes;
pub mod system_routes;
