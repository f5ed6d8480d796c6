pub mod backfill;
pub mod browser;
pub mod config;
pub mod crawl;
pub mod db;
pub mod error;
pub mod events;
pub mod export;
pub mod extract;
pub mod ingest;
pub mod media;
pub mod model;
pub mod repair;
pub mod retry;
pub mod storage;
