pub mod analysis;
pub mod chunker;
pub mod combiner;
pub mod cross_reference;
pub mod document;
pub mod error;
pub mod extract;
pub mod scheduler; // Batch intake, concurrency bound, status/result queries
pub mod types;
