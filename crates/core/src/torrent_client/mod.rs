//! Torrent client abstraction.
//!
//! This module provides a `TorrentClient` trait over the peer swarm, an
//! embedded librqbit implementation, and `.torrent` descriptor parsing.

mod descriptor;
mod librqbit;
mod types;

pub use descriptor::{parse_descriptor, Descriptor, DescriptorError, DescriptorFile};
pub use librqbit::LibrqbitClient;
pub use types::*;
