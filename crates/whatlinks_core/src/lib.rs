pub mod annotate;
pub mod config;
pub mod context;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod index;
pub mod merge;
pub mod model;
pub mod namespace;
pub mod pager;
pub mod planner;
pub mod runtime;
pub mod source;
pub mod store;
