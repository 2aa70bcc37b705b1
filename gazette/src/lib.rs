// Library interface for gazette modules
// This allows tests and other binaries to import modules

pub mod archive;
pub mod backoff;
pub mod fetch;
pub mod identity;
pub mod normalize;
pub mod orchestrator;
pub mod report;
pub mod throttle;
