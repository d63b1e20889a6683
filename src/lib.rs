pub mod clients;
pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod normalize;
pub mod ops;
pub mod reconcile;
pub mod scanner;
pub mod specs;
pub mod store;
pub mod time;
