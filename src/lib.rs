pub mod agent;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod exec;
pub mod hub;
pub mod links;
pub mod model;
pub mod orchestrator;
pub mod report;
pub mod repos;
pub mod stages;
pub mod store;
