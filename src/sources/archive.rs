//! Archive unpacking for downloaded sources.
//!
//! The format is detected from the file's leading bytes, not its name, since
//! download URLs frequently lack a meaningful extension.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tar::Archive;
use xz2::read::XzDecoder;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BZIP2_MAGIC: [u8; 3] = [b'B', b'Z', b'h'];
const XZ_MAGIC: [u8; 6] = [0xfd, b'7', b'z', b'X', b'Z', 0x00];
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];
const USTAR_OFFSET: usize = 257;

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    Zip,
}

/// Identify an archive by content.
pub fn detect(path: &Path) -> Result<Option<ArchiveKind>> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut header = [0u8; 512];
    let mut filled = 0;
    while filled < header.len() {
        let n = file
            .read(&mut header[filled..])
            .with_context(|| format!("failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    let header = &header[..filled];

    if header.starts_with(&GZIP_MAGIC) {
        return Ok(Some(ArchiveKind::TarGz));
    }
    if header.starts_with(&BZIP2_MAGIC) {
        return Ok(Some(ArchiveKind::TarBz2));
    }
    if header.starts_with(&XZ_MAGIC) {
        return Ok(Some(ArchiveKind::TarXz));
    }
    if header.starts_with(&ZIP_MAGIC) {
        return Ok(Some(ArchiveKind::Zip));
    }
    if header.len() >= USTAR_OFFSET + 5 && &header[USTAR_OFFSET..USTAR_OFFSET + 5] == b"ustar" {
        return Ok(Some(ArchiveKind::Tar));
    }
    Ok(None)
}

/// Unpack `archive` into `dest`, which must already exist.
pub fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    let kind = match detect(archive)? {
        Some(kind) => kind,
        None => bail!("{} is not a tar or zip archive", archive.display()),
    };
    tracing::debug!("unpacking {:?} archive {}", kind, archive.display());

    let file =
        File::open(archive).with_context(|| format!("failed to open {}", archive.display()))?;

    match kind {
        ArchiveKind::Tar => unpack_tar(BufReader::new(file), dest),
        ArchiveKind::TarGz => unpack_tar(GzDecoder::new(BufReader::new(file)), dest),
        ArchiveKind::TarBz2 => unpack_tar(BzDecoder::new(BufReader::new(file)), dest),
        ArchiveKind::TarXz => unpack_tar(XzDecoder::new(BufReader::new(file)), dest),
        ArchiveKind::Zip => unpack_zip(file, dest),
    }
    .with_context(|| format!("failed to unpack {}", archive.display()))
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);

    for entry in archive.entries().context("failed to read tar entries")? {
        let mut entry = entry.context("failed to read tar entry")?;
        let entry_path = entry.path().context("failed to get entry path")?.into_owned();
        let Some(relative) = sanitize(&entry_path) else {
            bail!("archive entry escapes destination: {}", entry_path.display());
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let output_path = dest.join(&relative);

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }

        let entry_type = entry.header().entry_type();
        match entry_type {
            tar::EntryType::Directory => {
                std::fs::create_dir_all(&output_path).with_context(|| {
                    format!("failed to create directory: {}", output_path.display())
                })?;
            }
            tar::EntryType::Regular
            | tar::EntryType::Continuous
            | tar::EntryType::Link
            | tar::EntryType::Symlink => {
                entry.unpack(&output_path).with_context(|| {
                    format!("failed to extract: {}", output_path.display())
                })?;
            }
            // pax/gnu metadata headers are consumed by the tar reader
            _ => {
                tracing::debug!(
                    "skipping unsupported entry type {:?}: {}",
                    entry_type,
                    entry_path.display()
                );
            }
        }
    }

    Ok(())
}

fn unpack_zip(file: File, dest: &Path) -> Result<()> {
    let mut archive =
        zip::ZipArchive::new(BufReader::new(file)).context("failed to open zip archive")?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("failed to read zip entry")?;
        let Some(relative) = entry.enclosed_name() else {
            bail!("zip entry escapes destination: {}", entry.name());
        };
        let output_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&output_path).with_context(|| {
                format!("failed to create directory: {}", output_path.display())
            })?;
            continue;
        }

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }

        let mut out = File::create(&output_path)
            .with_context(|| format!("failed to create {}", output_path.display()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to write {}", output_path.display()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&output_path, std::fs::Permissions::from_mode(mode))
                .with_context(|| format!("failed to set mode on {}", output_path.display()))?;
        }
    }

    Ok(())
}

/// Strip leading `./` and reject entries that climb out of the destination.
fn sanitize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
pub(crate) mod test_archives {
    use std::io::Write;

    use bzip2::write::BzEncoder;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use xz2::write::XzEncoder;

    fn tar_into<W: Write>(writer: W, files: &[(&str, &str)]) -> W {
        let mut builder = tar::Builder::new(writer);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    /// Build a tar.gz from (path, contents) pairs.
    pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
        tar_into(GzEncoder::new(Vec::new(), Compression::default()), files)
            .finish()
            .unwrap()
    }

    pub fn tar_bz2(files: &[(&str, &str)]) -> Vec<u8> {
        tar_into(BzEncoder::new(Vec::new(), bzip2::Compression::default()), files)
            .finish()
            .unwrap()
    }

    pub fn tar_xz(files: &[(&str, &str)]) -> Vec<u8> {
        tar_into(XzEncoder::new(Vec::new(), 6), files)
            .finish()
            .unwrap()
    }

    /// Build a zip from (path, contents) pairs.
    pub fn zip_archive(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (path, contents) in files {
            writer.start_file(*path, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }
}
