//! On-disk channel store and checkpoint tracking.
//!
//! One directory per (source, channel) holds posts with their comments,
//! per-analyzer record maps, and the checkpoint — laid out so cached data
//! can be inspected (or re-analyzed offline) without touching the network.

pub mod checkpoint;
pub mod store;

pub use checkpoint::{partition_by_age, CheckpointTracker, WindowPartition};
pub use store::{normalize_channel, write_json, ChannelInfo, ChannelStore, StoreError};
