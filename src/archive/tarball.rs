// src/archive/tarball.rs

//! Deterministic release archives
//!
//! Entries are written in manifest order with fixed metadata: GNU headers,
//! mtime [`BASE_TIME`], uid/gid 1000 owned by `xyz:xyz`, and modes reduced
//! to 0755/0644. Each directory is emitted just before the first entry
//! inside it. The gzip header carries no timestamp or file name, so the same
//! install tree always yields the same bytes.

use super::BASE_TIME;
use super::manifest::{EntryKind, Manifest};
use crate::error::Result;
use crate::hash::sha256_file;
use flate2::{Compression, GzBuilder};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tar::{Builder, EntryType, Header};
use tracing::debug;

pub const OWNER_ID: u64 = 1000;
pub const OWNER_NAME: &str = "xyz";

/// An extra file placed in the archive without existing on disk
pub struct ExtraFile<'a> {
    pub path: &'a str,
    pub contents: &'a [u8],
}

enum Item<'a> {
    Disk(&'a str, EntryKind),
    Extra(&'a ExtraFile<'a>),
}

impl Item<'_> {
    fn path(&self) -> &str {
        match self {
            Item::Disk(path, _) => path,
            Item::Extra(extra) => extra.path,
        }
    }
}

/// Write `root` as a gzipped tar to `output`, returning the archive SHA-256
///
/// The archive is assembled in a temporary file next to `output` and
/// renamed into place.
pub fn write_archive(root: &Path, manifest: &Manifest, extras: &[ExtraFile<'_>], output: &Path) -> Result<String> {
    let dir = output
        .parent()
        .ok_or_else(|| io::Error::other(format!("{} has no parent", output.display())))?;
    fs::create_dir_all(dir)?;

    let mut items: Vec<Item<'_>> = manifest
        .entries
        .iter()
        .map(|e| Item::Disk(e.path.as_str(), e.kind))
        .chain(extras.iter().map(Item::Extra))
        .collect();
    items.sort_by(|a, b| a.path().cmp(b.path()));

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    let encoder = GzBuilder::new()
        .mtime(0)
        .write(BufWriter::new(tmp.reopen()?), Compression::best());
    let mut archive = Builder::new(encoder);
    let mut emitted_dirs = BTreeSet::new();

    for item in &items {
        let path = item.path();
        append_parents(&mut archive, path, &mut emitted_dirs)?;

        match item {
            Item::Disk(path, EntryKind::Symlink) => {
                let target = fs::read_link(root.join(path))?;
                let mut header = header(EntryType::Symlink, 0o777, 0)?;
                archive.append_link(&mut header, path, &target)?;
            }
            Item::Disk(path, EntryKind::File) => {
                let source = root.join(path);
                let metadata = fs::metadata(&source)?;
                let mode = normalized_mode(metadata.permissions().mode());
                let mut header = header(EntryType::Regular, mode, metadata.len())?;
                archive.append_data(&mut header, path, File::open(&source)?)?;
            }
            Item::Extra(extra) => {
                let mut header = header(EntryType::Regular, 0o644, extra.contents.len() as u64)?;
                archive.append_data(&mut header, extra.path, extra.contents)?;
            }
        }
    }

    let encoder = archive.into_inner()?;
    let writer = encoder.finish()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    tmp.persist(output).map_err(|e| e.error)?;
    debug!("Wrote {} ({} entries)", output.display(), items.len());

    Ok(sha256_file(output)?)
}

fn append_parents<W: io::Write>(
    archive: &mut Builder<W>,
    path: &str,
    emitted: &mut BTreeSet<String>,
) -> io::Result<()> {
    let mut prefix = String::new();
    let components: Vec<&str> = path.split('/').collect();

    for component in &components[..components.len().saturating_sub(1)] {
        prefix.push_str(component);
        prefix.push('/');
        if emitted.insert(prefix.clone()) {
            let mut header = header(EntryType::Directory, 0o755, 0)?;
            archive.append_data(&mut header, &prefix, io::empty())?;
        }
    }
    Ok(())
}

fn header(entry_type: EntryType, mode: u32, size: u64) -> io::Result<Header> {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(BASE_TIME);
    header.set_uid(OWNER_ID);
    header.set_gid(OWNER_ID);
    header.set_username(OWNER_NAME)?;
    header.set_groupname(OWNER_NAME)?;
    Ok(header)
}

/// Any execute bit makes a file 0755; everything else is 0644
fn normalized_mode(mode: u32) -> u32 {
    if mode & 0o111 != 0 { 0o755 } else { 0o644 }
}
