// Core modules implementing the engine contract, records, request bridging, and errors.
pub mod engine;
pub mod error;
pub mod local;
pub mod record;
pub mod request;
