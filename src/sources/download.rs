//! Download source - a library fetched as an archive.
//!
//! Archives are kept in a content-addressed cache keyed by the declared
//! checksum, so a given archive is downloaded once per checkout no matter
//! how many targets are built from it. Cached files are verified again
//! before every use; concurrent writers of the same key are harmless since
//! the content is the same.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::sources::archive;
use crate::sources::{Source, SourceOptions};
use crate::util::errors::NeedyError;
use crate::util::fs::{collapse_lone_directories, ensure_dir, recreate_dir, remove_path};
use crate::util::hash::Checksum;
use crate::util::process::CancellationToken;
use crate::util::shell::Shell;

/// Total attempts before a download is declared failed.
pub const DOWNLOAD_ATTEMPTS: u32 = 5;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A library distributed as a tar or zip archive.
pub struct DownloadSource {
    url: String,
    checksum: Checksum,
    source_directory: PathBuf,
    cache_directory: PathBuf,
    timeout: Duration,
    /// Delay unit; attempt `n` waits `n * retry_delay` before retrying
    retry_delay: Duration,
    offline: bool,
    cancel: CancellationToken,
    shell: Arc<Shell>,
}

impl DownloadSource {
    pub fn new(
        url: String,
        checksum: Checksum,
        source_directory: PathBuf,
        options: &SourceOptions,
    ) -> Self {
        DownloadSource {
            url,
            checksum,
            source_directory,
            cache_directory: options.download_cache.clone(),
            timeout: options.download_timeout.unwrap_or(DEFAULT_TIMEOUT),
            retry_delay: Duration::from_secs(1),
            offline: options.offline,
            cancel: options.cancel.clone(),
            shell: options.shell.clone(),
        }
    }

    /// Override the linear backoff unit.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Location of the cached archive.
    pub fn cached_archive(&self) -> PathBuf {
        self.cache_directory.join(self.checksum.to_hex())
    }

    /// Make sure a verified archive is in the cache and return its path.
    pub fn fetch(&self) -> Result<PathBuf> {
        let cached = self.cached_archive();

        if cached.is_file() {
            if self.checksum.matches_file(&cached)? {
                tracing::debug!("using cached archive {}", cached.display());
                return Ok(cached);
            }
            tracing::warn!("cached archive {} is corrupt, fetching again", cached.display());
            remove_path(&cached)?;
        }

        if self.offline {
            bail!("{} is not cached and network access is disabled", self.url);
        }

        ensure_dir(&self.cache_directory)?;
        self.download(&cached)?;
        Ok(cached)
    }

    fn download(&self, destination: &Path) -> Result<()> {
        tracing::info!("downloading {}", self.url);

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("failed to create HTTP client")?;

        let mut attempt = 0;
        let (response, size) = loop {
            self.cancel.check()?;
            attempt += 1;

            match client.get(&self.url).send() {
                Ok(response) if response.status().is_success() => {
                    if let Some(size) = response.content_length() {
                        break (response, size);
                    }
                    tracing::warn!("{} returned no content length", self.url);
                }
                Ok(response) => {
                    tracing::warn!("{} returned HTTP {}", self.url, response.status());
                }
                Err(e) => {
                    tracing::warn!("request to {} failed: {}", self.url, e);
                }
            }

            if attempt >= DOWNLOAD_ATTEMPTS {
                return Err(NeedyError::DownloadFailure {
                    url: self.url.clone(),
                    attempts: attempt,
                }
                .into());
            }
            tracing::info!("download failed, retrying (attempt {})", attempt + 1);
            thread::sleep(self.retry_delay * attempt);
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&self.cache_directory).with_context(|| {
            format!(
                "failed to create temporary file in {}",
                self.cache_directory.display()
            )
        })?;

        let progress = self.shell.bytes_progress(size, "Downloading");
        let mut reader = progress.wrap_read(response);
        let mut buffer = [0u8; 16 * 1024];
        let mut received = 0u64;
        loop {
            self.cancel.check()?;
            let n = reader
                .read(&mut buffer)
                .with_context(|| format!("failed to read response from {}", self.url))?;
            if n == 0 {
                break;
            }
            tmp.write_all(&buffer[..n])
                .context("failed to write downloaded data")?;
            received += n as u64;
        }
        progress.finish_and_clear();

        if received != size {
            bail!(
                "download of {} was truncated: expected {} bytes, received {}",
                self.url,
                size,
                received
            );
        }

        tmp.flush().context("failed to write downloaded data")?;
        let actual = self.checksum.compute_file(tmp.path())?;
        self.verify(&actual)?;

        tmp.persist(destination)
            .with_context(|| format!("failed to store {}", destination.display()))?;
        tracing::debug!("checksum verified, cached at {}", destination.display());
        Ok(())
    }

    fn verify(&self, actual: &[u8]) -> Result<()> {
        let expected = self.checksum.to_hex();
        let actual = hex::encode(actual);
        if actual != expected {
            return Err(NeedyError::ChecksumMismatch {
                url: self.url.clone(),
                expected,
                actual,
            }
            .into());
        }
        Ok(())
    }
}

impl Source for DownloadSource {
    fn name(&self) -> &str {
        "download"
    }

    fn source_directory(&self) -> &Path {
        &self.source_directory
    }

    fn clean(&self) -> Result<()> {
        let archive_path = self.fetch()?;

        tracing::debug!("unpacking to {}", self.source_directory.display());
        recreate_dir(&self.source_directory)?;
        archive::unpack(&archive_path, &self.source_directory)?;

        let removed = collapse_lone_directories(&self.source_directory)?;
        if removed > 0 {
            tracing::debug!("collapsed {} wrapper director(ies)", removed);
        }
        Ok(())
    }

    fn status(&self) -> Result<String> {
        Ok(format!("download: {} ({})", self.url, self.checksum.to_hex()))
    }

    fn identity(&self) -> String {
        format!("download:{}#{}", self.url, self.checksum.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::archive::test_archives::{tar_gz, zip_archive};
    use crate::util::errors::find_needy_error;
    use std::io::BufRead;
    use std::net::TcpListener;
    use tempfile::TempDir;

    fn md5_hex(data: &[u8]) -> String {
        use sha2::Digest;
        hex::encode(md5::Md5::digest(data))
    }

    fn options(tmp: &Path) -> SourceOptions {
        SourceOptions::new(tmp.join("cache"), Arc::new(Shell::captured()))
    }

    /// Serve `body` once per connection for `connections` connections.
    fn serve(body: Vec<u8>, status: &'static str, connections: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming().take(connections) {
                let mut stream = stream.unwrap();
                let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).unwrap() > 0 {
                    if line == "\r\n" {
                        break;
                    }
                    line.clear();
                }
                let header = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                stream.write_all(header.as_bytes()).unwrap();
                stream.write_all(&body).unwrap();
            }
        });
        format!("http://{}/lib.tar.gz", addr)
    }

    #[test]
    fn test_clean_seeded_cache_collapses_wrapper() {
        let tmp = TempDir::new().unwrap();
        let bytes = tar_gz(&[("foo/a", "1"), ("foo/b", "2")]);
        let checksum = Checksum::parse(&md5_hex(&bytes)).unwrap();

        let dest = tmp.path().join("source");
        let source = DownloadSource::new(
            "http://unreachable.invalid/foo.tgz".to_string(),
            checksum,
            dest.clone(),
            &options(tmp.path()),
        );
        std::fs::create_dir_all(tmp.path().join("cache")).unwrap();
        std::fs::write(source.cached_archive(), &bytes).unwrap();

        source.clean().unwrap();
        assert_eq!(std::fs::read_to_string(dest.join("a")).unwrap(), "1");
        assert_eq!(std::fs::read_to_string(dest.join("b")).unwrap(), "2");
        assert!(!dest.join("foo").exists());
    }

    #[test]
    fn test_clean_leaves_multiple_roots() {
        let tmp = TempDir::new().unwrap();
        let bytes = zip_archive(&[("foo/a", "1"), ("bar/b", "2")]);
        let checksum = Checksum::parse(&md5_hex(&bytes)).unwrap();

        let dest = tmp.path().join("source");
        let source = DownloadSource::new(
            "http://unreachable.invalid/x.zip".to_string(),
            checksum,
            dest.clone(),
            &options(tmp.path()),
        );
        std::fs::create_dir_all(tmp.path().join("cache")).unwrap();
        std::fs::write(source.cached_archive(), &bytes).unwrap();

        source.clean().unwrap();
        assert!(dest.join("foo/a").exists());
        assert!(dest.join("bar/b").exists());
    }

    #[test]
    fn test_download_and_cache() {
        let tmp = TempDir::new().unwrap();
        let bytes = tar_gz(&[("lib/include/lib.h", "int f();")]);
        let url = serve(bytes.clone(), "200 OK", 1);

        let source = DownloadSource::new(
            url,
            Checksum::parse(&md5_hex(&bytes)).unwrap(),
            tmp.path().join("source"),
            &options(tmp.path()),
        )
        .with_retry_delay(Duration::from_millis(1));

        let cached = source.fetch().unwrap();
        assert_eq!(std::fs::read(&cached).unwrap(), bytes);

        // second fetch is served from the cache; the server is gone
        source.clean().unwrap();
        assert!(tmp.path().join("source/include/lib.h").exists());
    }

    #[test]
    fn test_checksum_mismatch_is_not_retried() {
        let tmp = TempDir::new().unwrap();
        let bytes = tar_gz(&[("a", "1")]);
        let url = serve(bytes, "200 OK", 1);

        let source = DownloadSource::new(
            url,
            Checksum::parse(&md5_hex(b"something else")).unwrap(),
            tmp.path().join("source"),
            &options(tmp.path()),
        )
        .with_retry_delay(Duration::from_millis(1));

        let err = source.fetch().unwrap_err();
        assert!(matches!(
            find_needy_error(&err),
            Some(NeedyError::ChecksumMismatch { .. })
        ));
        assert!(!source.cached_archive().exists());
    }

    #[test]
    fn test_http_errors_exhaust_retries() {
        let tmp = TempDir::new().unwrap();
        let url = serve(b"missing".to_vec(), "404 Not Found", DOWNLOAD_ATTEMPTS as usize);

        let source = DownloadSource::new(
            url,
            Checksum::parse(&md5_hex(b"x")).unwrap(),
            tmp.path().join("source"),
            &options(tmp.path()),
        )
        .with_retry_delay(Duration::from_millis(1));

        let err = source.fetch().unwrap_err();
        assert!(matches!(
            find_needy_error(&err),
            Some(NeedyError::DownloadFailure { attempts, .. }) if *attempts == DOWNLOAD_ATTEMPTS
        ));
    }

    #[test]
    fn test_offline_without_cache_fails() {
        let tmp = TempDir::new().unwrap();
        let mut opts = options(tmp.path());
        opts.offline = true;
        let source = DownloadSource::new(
            "http://unreachable.invalid/x".to_string(),
            Checksum::parse(&md5_hex(b"x")).unwrap(),
            tmp.path().join("source"),
            &opts,
        );
        assert!(source.fetch().is_err());
    }
}
