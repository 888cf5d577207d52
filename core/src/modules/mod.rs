pub mod directory;
pub mod fetcher;
