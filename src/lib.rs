pub mod abi;
pub mod abi_provider;
pub mod calltrace;
pub mod config;
pub mod error;
pub mod generator;
pub mod harness;
pub mod logger;
pub mod mutation;
pub mod onchain;
pub mod orchestrator;
pub mod path;
pub mod rules;
pub mod similarity;
pub mod simulator;
pub mod snapshot;
pub mod tracer;
pub mod types;
