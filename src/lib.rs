pub mod acquire;
pub mod api;
pub mod classifier;
pub mod config;
pub mod desktop;
pub mod dispatcher;
pub mod grid;
pub mod scanner;
pub mod state;
pub mod system;
