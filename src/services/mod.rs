pub mod dispatcher;
pub mod registry;
pub mod sweeper;
pub mod worker;
