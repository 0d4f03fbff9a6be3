//! Building blocks for [`clap`]-driven configs of the shard stream poller.
//!
//! They can easily be re-used using `#[clap(flatten)]`.
pub mod stream_poller;
