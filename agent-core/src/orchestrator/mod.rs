mod client;

pub use client::OrchestratorClient;
