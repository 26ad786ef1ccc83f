pub mod condition;
pub mod config;
pub mod error;
pub mod feeds;
pub mod governance;
pub mod icons;
pub mod location;
pub mod model;
pub mod na;
pub mod persist;
pub mod providers;
pub mod registry;
pub mod search;
