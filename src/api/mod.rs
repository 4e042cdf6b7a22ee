pub mod fetcher;
pub mod overfast_api;
