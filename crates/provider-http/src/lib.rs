// Genqueue Provider Adapter - HTTP client for the generation API

mod client;

pub use client::{HttpGenerationProvider, ProviderConfig};
