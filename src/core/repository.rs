use crate::{MirrorError, Result};
use serde::Serialize;
use url::Url;

/// Architecture token for source repositories (`deb-src` lines).
pub const SOURCE_ARCH: &str = "src";
/// Architecture-independent packages, always mirrored alongside a binary architecture.
pub const ALL_ARCH: &str = "all";

/// One `(architecture, uri, distribution, components)` tuple from a repository line.
#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    pub architecture: String,
    pub url: Url,
    pub version: String,
    pub components: Vec<String>,
    arch_path: String,
    list_file: String,
}

impl PartialEq for Repository {
    fn eq(&self, other: &Self) -> bool {
        self.architecture == other.architecture
            && self.url.as_str() == other.url.as_str()
            && self.version == other.version
            && self.components == other.components
    }
}

impl Eq for Repository {}

/// Resolves a `deb`/`deb-<arch>`/`deb-src` line into repositories.
///
/// Binary lines yield a second repository with architecture `all`; source
/// lines yield exactly one.
pub fn parse_repo(line: &str, default_arch: &str) -> Result<Vec<Repository>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(MirrorError::MalformedRepository(line.trim().to_string()));
    }

    let architecture = match tokens[0] {
        "deb" => default_arch,
        selector => match selector.strip_prefix("deb-") {
            Some(arch) if !arch.is_empty() => arch,
            _ => return Err(MirrorError::ArchitectureSelector(selector.to_string())),
        },
    };
    if architecture.is_empty() {
        return Err(MirrorError::ArchitectureSelector(tokens[0].to_string()));
    }

    let mut uri = tokens[1].to_string();
    if !uri.ends_with('/') {
        uri.push('/');
    }
    let url = Url::parse(&uri).map_err(|source| MirrorError::RepoUri {
        uri: tokens[1].to_string(),
        source,
    })?;

    let (arch_path, list_file) = if architecture == SOURCE_ARCH {
        ("source".to_string(), "Sources".to_string())
    } else {
        (format!("binary-{}", architecture), "Packages".to_string())
    };

    let primary = Repository {
        architecture: architecture.to_string(),
        url,
        version: tokens[2].to_string(),
        components: tokens[3..].iter().map(|c| c.to_string()).collect(),
        arch_path,
        list_file,
    };

    if primary.is_source() {
        return Ok(vec![primary]);
    }

    let all = Repository {
        architecture: ALL_ARCH.to_string(),
        ..primary.clone()
    };
    Ok(vec![primary, all])
}

impl Repository {
    pub fn is_source(&self) -> bool {
        self.architecture == SOURCE_ARCH
    }

    /// `binary-<arch>` or `source`.
    pub fn arch_path(&self) -> &str {
        &self.arch_path
    }

    /// `Packages` or `Sources`.
    pub fn list_file(&self) -> &str {
        &self.list_file
    }

    /// Resolves `path` against the repository base URI.
    pub fn file(&self, path: &str) -> Result<Url> {
        self.url
            .join(path)
            .map_err(|source| MirrorError::RepoUri {
                uri: format!("{}{}", self.url, path),
                source,
            })
    }

    /// Release files plus per-component Contents and Release files.
    pub fn info_files(&self) -> Result<Vec<Url>> {
        let mut files = Vec::with_capacity(2 + self.components.len() * 3);
        files.push(self.file(&format!("dists/{}/Release", self.version))?);
        files.push(self.file(&format!("dists/{}/Release.gpg", self.version))?);

        for component in &self.components {
            let contents = format!(
                "dists/{}/{}/Contents-{}",
                self.version, component, self.architecture
            );
            files.push(self.file(&contents)?);
            files.push(self.file(&format!("{}.gz", contents))?);
            files.push(self.file(&format!(
                "dists/{}/{}/{}/Release",
                self.version, component, self.arch_path
            ))?);
        }
        Ok(files)
    }

    pub fn packages(&self, component: &str) -> Result<Url> {
        self.file(&format!(
            "dists/{}/{}/{}/{}",
            self.version, component, self.arch_path, self.list_file
        ))
    }

    pub fn packages_gz(&self, component: &str) -> Result<Url> {
        self.file(&format!(
            "dists/{}/{}/{}/{}.gz",
            self.version, component, self.arch_path, self.list_file
        ))
    }

    /// One bzip2 translation index per component for `lang`.
    pub fn translations(&self, lang: &str) -> Result<Vec<Url>> {
        self.components
            .iter()
            .map(|component| {
                self.file(&format!(
                    "dists/{}/{}/i18n/Translation-{}.bz2",
                    self.version, component, lang
                ))
            })
            .collect()
    }
}
