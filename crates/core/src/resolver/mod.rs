//! Source URL resolution: transport classification, mirror rewrite,
//! filename detection.

mod filename;
mod magnet;
mod mirror;

pub use filename::{
    choose_filename, extension_for_mime, parse_content_disposition, FileInfo, FilenameProbe,
};
pub use magnet::{build_magnet_uri, is_magnet, parse_magnet, MagnetInfo};
pub use mirror::MirrorResolver;
