pub mod archive;
pub mod challenges;
pub mod metrics;
pub mod upload_pipeline;
pub mod xml_parser;
