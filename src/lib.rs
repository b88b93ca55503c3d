pub mod config;
pub mod crawl;
pub mod error;
pub mod fetch;
pub mod ingredients;
pub mod normalize;
pub mod parser;
pub mod processor;
pub mod recipe;
pub mod schema;
pub mod sitemap;
pub mod store;
