// Library interface for docent modules
// This allows tests and the two binaries (docent, harvest) to import modules

pub mod dataset;
pub mod extraction;
pub mod images;
pub mod ingestion;
pub mod llm;
pub mod museums;
pub mod processing;
pub mod prompt;
pub mod publish;
pub mod server;
pub mod sessions;
pub mod storage;
