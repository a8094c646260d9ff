//! A small, single-indirection block filesystem, interpreting a
//! fixed-size file as an array of 4096-byte blocks: one superblock, an
//! inode table, and a data region. No journaling, no directories, no
//! permissions or timestamps, just inodes, direct and indirect block
//! pointers, and an in-memory free-block bitmap rebuilt at mount time.

pub mod disk;
pub mod fs;
pub mod layout;

pub use disk::Device;
pub use fs::FileSystem;
pub use layout::{Inode, SuperBlock, BLOCK_SIZE, MAGIC_NUMBER, MAX_FILE_SIZE};
