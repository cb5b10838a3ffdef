//! FUSE surface: the read-only tree, the library view, mount lifecycle

pub mod fs;
pub mod library;
pub mod mount;

pub use fs::EdrFs;
pub use library::{DefaultLibraryLayout, LibraryLayout};
pub use mount::{mount, MountGuard};
