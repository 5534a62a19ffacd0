//! Umbrella over the handoff crates, so end-to-end tests (and embedders) need one dependency.

pub use kernarg_channel as channel;
pub use kernarg_device as device;
pub use kernarg_harness as harness;
