use crate::core::config::MirrorPaths;
use crate::core::control::{parse_control_file, Stanza};
use crate::core::repository::Repository;
use crate::{MirrorError, Result};
use serde::Serialize;
use std::io::BufRead;
use std::path::Path;
use tokio::fs;
use url::Url;

/// A single file to mirror, as listed in a Packages or Sources index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageEntry {
    pub url: Url,
    pub size: u64,
    /// MD5 for binary packages, the first checksum column for sources.
    pub checksum: String,
}

impl PackageEntry {
    /// True when a file of exactly the expected size already sits in the
    /// mirror or the staging tree. Size is the only evidence checked.
    pub async fn is_satisfied(&self, paths: &MirrorPaths) -> bool {
        self.size_matches(&paths.mirror_path(&self.url)).await
            || self.size_matches(&paths.skel_path(&self.url)).await
    }

    async fn size_matches(&self, path: &Path) -> bool {
        fs::metadata(path)
            .await
            .map(|meta| meta.is_file() && meta.len() == self.size)
            .unwrap_or(false)
    }

    /// Human readable reason for a cache miss, for download logging.
    pub async fn miss_reason(&self, paths: &MirrorPaths) -> String {
        for path in [paths.mirror_path(&self.url), paths.skel_path(&self.url)] {
            if let Ok(meta) = fs::metadata(&path).await {
                return format!("size {} not {}", meta.len(), self.size);
            }
        }
        "file not found".to_string()
    }
}

fn parse_size(file: &str, value: &str) -> Result<u64> {
    value.parse().map_err(|_| MirrorError::PackageListFormat {
        file: file.to_string(),
        value: value.to_string(),
    })
}

fn binary_entries(repo: &Repository, stanza: &Stanza, out: &mut Vec<PackageEntry>) -> Result<()> {
    let filename = stanza.first("Filename").trim();
    let size = stanza.first("Size").trim();
    let md5 = stanza.first("MD5sum").trim();
    if filename.is_empty() || size.is_empty() || md5.is_empty() {
        return Ok(());
    }

    out.push(PackageEntry {
        url: repo.file(filename)?,
        size: parse_size(filename, size)?,
        checksum: md5.to_string(),
    });
    Ok(())
}

fn source_entries(repo: &Repository, stanza: &Stanza, out: &mut Vec<PackageEntry>) -> Result<()> {
    let directory = stanza.first("Directory").trim().trim_end_matches('/');
    let Some(files) = stanza.get("Files") else {
        return Ok(());
    };
    if directory.is_empty() {
        return Ok(());
    }

    for line in files {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [checksum, size, name] = fields[..] else {
            continue;
        };
        let path = format!("{}/{}", directory, name);
        out.push(PackageEntry {
            url: repo.file(&path)?,
            size: parse_size(&path, size)?,
            checksum: checksum.to_string(),
        });
    }
    Ok(())
}

/// Parses a Packages or Sources index into download entries.
///
/// Stanzas are separated by blank lines. Binary stanzas missing any of
/// `Filename`, `Size` or `MD5sum` are skipped; a size that is not a number
/// aborts the whole parse.
pub fn parse_package_list<R: BufRead>(repo: &Repository, mut reader: R) -> Result<Vec<PackageEntry>> {
    let collect = if repo.is_source() {
        source_entries
    } else {
        binary_entries
    };

    let mut entries = Vec::new();
    let mut block = String::new();
    let mut raw = Vec::new();

    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            break;
        }
        // free-text fields are not always UTF-8; the fields read here are ASCII
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches(['\n', '\r']);
        if !line.trim().is_empty() {
            block.push_str(line);
            block.push('\n');
            continue;
        }
        if !block.is_empty() {
            collect(repo, &parse_control_file(&block), &mut entries)?;
            block.clear();
        }
    }
    if !block.is_empty() {
        collect(repo, &parse_control_file(&block), &mut entries)?;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::repository::parse_repo;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn binary_repo() -> Repository {
        parse_repo("deb http://ftp.tw.debian.org/debian stable main", "amd64")
            .unwrap()
            .remove(0)
    }

    fn source_repo() -> Repository {
        parse_repo("deb-src http://ftp.tw.debian.org/debian stable main", "amd64")
            .unwrap()
            .remove(0)
    }

    const PACKAGES: &str = "\
Package: hello
Version: 2.10-2
Architecture: amd64
Filename: pool/main/h/hello/hello_2.10-2_amd64.deb
Size: 56132
MD5sum: 52b0cad2e741dd722c3e2e16a0aae57e
Description: example package based on GNU hello
 The GNU hello program produces a familiar, friendly greeting.


Package: no-size
Filename: pool/main/n/no-size/no-size_1_amd64.deb
MD5sum: 00000000000000000000000000000000

Package: libc-bin
Filename: pool/main/g/glibc/libc-bin_2.24-11_amd64.deb
Size: 779544
MD5sum: 2d3b6c0a3aa9c4f0b6ffb4a08e0d46b4";

    #[test]
    fn binary_stanzas_become_entries() {
        let entries = parse_package_list(&binary_repo(), Cursor::new(PACKAGES)).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].url.as_str(),
            "http://ftp.tw.debian.org/debian/pool/main/h/hello/hello_2.10-2_amd64.deb"
        );
        assert_eq!(entries[0].size, 56132);
        assert_eq!(entries[0].checksum, "52b0cad2e741dd722c3e2e16a0aae57e");
        assert_eq!(entries[1].size, 779544);
    }

    #[test]
    fn invalid_size_is_fatal() {
        let text = "Filename: pool/a.deb\nSize: big\nMD5sum: abc\n";
        let err = parse_package_list(&binary_repo(), Cursor::new(text)).unwrap_err();
        assert!(matches!(err, MirrorError::PackageListFormat { value, .. } if value == "big"));
    }

    const SOURCES: &str = "\
Package: hello
Binary: hello
Version: 2.10-2
Directory: pool/main/h/hello
Files:
 35b1508eeee9c1dfba798c4c04304ef0 1869 hello_2.10-2.dsc
 6cd0ffea3884a4e79330338dcc2987d6 725946 hello_2.10.orig.tar.gz
 e2b3d0a3b6c5d1e7f6f1b6d1f0d9c0b1 6132 hello_2.10-2.debian.tar.xz
Checksums-Sha256:
 a2ba5c1f6f8e0cd0c1d9b7a8f6e7f1d2c3b4a5968778695a4b3c2d1e0f9a8b7c6 1869 hello_2.10-2.dsc

Package: broken
Files:
 35b1508eeee9c1dfba798c4c04304ef0 1869 broken.dsc
";

    #[test]
    fn source_files_resolve_against_directory() {
        let entries = parse_package_list(&source_repo(), Cursor::new(SOURCES)).unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[1].url.as_str(),
            "http://ftp.tw.debian.org/debian/pool/main/h/hello/hello_2.10.orig.tar.gz"
        );
        assert_eq!(entries[1].size, 725946);
        assert_eq!(entries[1].checksum, "6cd0ffea3884a4e79330338dcc2987d6");
        assert_eq!(entries[2].size, 6132);
    }

    #[test]
    fn source_lines_with_wrong_arity_are_skipped() {
        let text = "Directory: pool/x\nFiles:\n abc 12\n def 34 x.dsc extra\n 0123 5 ok.dsc\n";
        let entries = parse_package_list(&source_repo(), Cursor::new(text)).unwrap();

        assert_eq!(entries.len(), 1);
        assert!(entries[0].url.path().ends_with("/pool/x/ok.dsc"));
    }

    #[test]
    fn non_utf8_description_is_tolerated() {
        let mut text = b"Package: cafe\nFilename: pool/main/c/cafe/cafe_1_amd64.deb\nSize: 7\n\
MD5sum: abc\nDescription: caf".to_vec();
        text.push(0xe9);
        text.extend_from_slice(b"\n mon caf\xe9 est ferm\xe9\r\n\nFilename: pool/b.deb\nSize: 1\nMD5sum: d\n");

        let entries = parse_package_list(&binary_repo(), Cursor::new(text)).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].size, 7);
        assert!(entries[0].url.path().ends_with("/cafe_1_amd64.deb"));
        assert_eq!(entries[1].checksum, "d");
    }

    #[test]
    fn empty_input_yields_nothing() {
        let entries = parse_package_list(&binary_repo(), Cursor::new("\n\n\n")).unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn satisfied_only_by_exact_size() {
        let dir = TempDir::new().unwrap();
        let paths = MirrorPaths::new(dir.path().join("skel"), dir.path().join("mirror"));
        let entry = PackageEntry {
            url: Url::parse("http://host/debian/pool/a.deb").unwrap(),
            size: 4,
            checksum: String::new(),
        };

        assert!(!entry.is_satisfied(&paths).await);
        assert_eq!(entry.miss_reason(&paths).await, "file not found");

        let mirrored = paths.mirror_path(&entry.url);
        std::fs::create_dir_all(mirrored.parent().unwrap()).unwrap();
        std::fs::write(&mirrored, b"abc").unwrap();
        assert!(!entry.is_satisfied(&paths).await);
        assert_eq!(entry.miss_reason(&paths).await, "size 3 not 4");

        std::fs::write(&mirrored, b"abcd").unwrap();
        assert!(entry.is_satisfied(&paths).await);
    }

    #[tokio::test]
    async fn staged_copy_also_satisfies() {
        let dir = TempDir::new().unwrap();
        let paths = MirrorPaths::new(dir.path().join("skel"), dir.path().join("mirror"));
        let entry = PackageEntry {
            url: Url::parse("http://host/debian/pool/b.deb").unwrap(),
            size: 2,
            checksum: String::new(),
        };

        let staged = paths.skel_path(&entry.url);
        std::fs::create_dir_all(staged.parent().unwrap()).unwrap();
        std::fs::write(&staged, b"ok").unwrap();
        assert!(entry.is_satisfied(&paths).await);
    }
}
