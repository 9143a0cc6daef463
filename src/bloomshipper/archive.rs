//! Block Archive Codec
//!
//! Blocks travel as a single gzip-compressed tar of the block directory.
//! Packing is deterministic: entries are sorted and carry a fixed mtime,
//! mode and owner, so the same directory always yields the same bytes.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;
const MTIME: u64 = 0;

/// Relative paths of all regular files under `dir`, sorted
fn collect_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(root, &path, out)?;
            } else if path.is_file() {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                out.push(relative.to_path_buf());
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(dir, dir, &mut files)?;
    files.sort();
    Ok(files)
}

/// Write a tar.gz of every file under `dir` into `writer`
pub fn pack_directory<W: Write>(dir: &Path, writer: W) -> io::Result<W> {
    let gz = GzEncoder::new(writer, Compression::default());
    let mut tar = tar::Builder::new(gz);

    let files = collect_files(dir)?;

    let mut directories: Vec<&Path> = files
        .iter()
        .filter_map(|f| f.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .collect();
    directories.sort();
    directories.dedup();

    for dir_path in directories {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(DIR_MODE);
        header.set_mtime(MTIME);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        tar.append_data(&mut header, dir_path, io::empty())?;
    }

    for relative in &files {
        let contents = fs::read(dir.join(relative))?;

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(contents.len() as u64);
        header.set_mode(FILE_MODE);
        header.set_mtime(MTIME);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        tar.append_data(&mut header, relative, contents.as_slice())?;
    }

    let gz = tar.into_inner()?;
    gz.finish()
}

/// Pack `dir` into an in-memory archive
pub fn pack_directory_to_vec(dir: &Path) -> io::Result<Vec<u8>> {
    pack_directory(dir, Vec::new())
}

/// Decompress and unpack an archive into `dest`, creating it if needed.
///
/// The whole stream is decompressed first so the gzip trailer checksum is
/// verified before anything lands on disk.
pub fn unpack<R: Read>(reader: R, dest: &Path) -> io::Result<()> {
    let mut tar_bytes = Vec::new();
    GzDecoder::new(reader).read_to_end(&mut tar_bytes)?;

    fs::create_dir_all(dest)?;
    let mut archive = tar::Archive::new(tar_bytes.as_slice());
    archive.set_preserve_mtime(false);
    archive.unpack(dest)
}
