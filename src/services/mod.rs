pub mod appearance_cache;
pub mod batch_runner;
pub mod command_mapper;
pub mod error_classifier;
pub mod import_service;
pub mod job_tracker;
pub mod mcp_service;
pub mod phase_splitter;
pub mod response_parser;
pub mod retry_policy;
pub mod undo_service;

#[cfg(test)]
pub mod test_support;
