//! Shared helpers for building layer tarballs in tests.

#![allow(dead_code)]

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use tar::{EntryType, Header};

/// Builder for an in-memory layer tarball.
pub struct Layer(tar::Builder<Vec<u8>>);

impl Layer {
    pub fn new() -> Self {
        Self(tar::Builder::new(Vec::new()))
    }

    fn header(kind: EntryType, mode: u32, size: u64) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(kind);
        header.set_mode(mode);
        header.set_size(size);
        header
    }

    pub fn file(mut self, name: &str, contents: &str, mode: u32) -> Self {
        let mut header = Self::header(EntryType::Regular, mode, contents.len() as u64);
        self.0
            .append_data(&mut header, name, contents.as_bytes())
            .unwrap();
        self
    }

    pub fn dir(mut self, name: &str, mode: u32) -> Self {
        let mut header = Self::header(EntryType::Directory, mode, 0);
        self.0.append_data(&mut header, name, io::empty()).unwrap();
        self
    }

    pub fn symlink(mut self, name: &str, target: &str) -> Self {
        let mut header = Self::header(EntryType::Symlink, 0o777, 0);
        header.set_link_name(target).unwrap();
        self.0.append_data(&mut header, name, io::empty()).unwrap();
        self
    }

    pub fn hardlink(mut self, name: &str, target: &str) -> Self {
        let mut header = Self::header(EntryType::Link, 0, 0);
        header.set_link_name(target).unwrap();
        self.0.append_data(&mut header, name, io::empty()).unwrap();
        self
    }

    pub fn char_device(mut self, name: &str) -> Self {
        let mut header = Self::header(EntryType::Char, 0o666, 0);
        self.0.append_data(&mut header, name, io::empty()).unwrap();
        self
    }

    pub fn bytes(self) -> Vec<u8> {
        self.0.into_inner().unwrap()
    }
}

pub fn mode_of(path: &Path) -> u32 {
    fs::symlink_metadata(path).unwrap().permissions().mode() & 0o7777
}

pub fn inode_of(path: &Path) -> u64 {
    fs::symlink_metadata(path).unwrap().ino()
}
