pub mod abi;
pub mod chain;
pub mod cli;
pub mod config;
pub mod cosign;
pub mod esr;
pub mod interfaces;
pub mod serializer;
pub mod signer;
pub mod tracing;
pub mod web;
