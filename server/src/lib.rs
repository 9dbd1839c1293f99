pub mod config;
pub mod highlights;
pub mod ingest_server;
pub mod postprocess;
pub mod recording;
pub mod render;
pub mod store;
pub mod synchronizer;
