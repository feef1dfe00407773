use crate::core::repository::{parse_repo, Repository};
use crate::{constants::*, MirrorError, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;
use url::Url;

/// Resolved contents of a `mirror.list` file.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MirrorConfig {
    pub variables: HashMap<String, String>,
    pub repositories: Vec<Repository>,
    /// Base URLs whose mirror directories are swept of stale files.
    pub clean: HashSet<Url>,
}

/// The two on-disk trees, both keyed by `host/path` of the source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPaths {
    skel_root: PathBuf,
    mirror_root: PathBuf,
}

impl MirrorPaths {
    pub fn new(skel_root: impl Into<PathBuf>, mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            skel_root: skel_root.into(),
            mirror_root: mirror_root.into(),
        }
    }

    pub fn skel_root(&self) -> &Path {
        &self.skel_root
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    /// `host[:port]/path` for `url`; this is also the live-set key.
    ///
    /// Never absolute, so joining it onto a root always stays below that root.
    pub fn relative(url: &Url) -> String {
        let path = url.path().trim_start_matches('/');
        match (url.host_str().filter(|h| !h.is_empty()), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}/{}", host, port, path),
            (Some(host), None) => format!("{}/{}", host, path),
            (None, _) => path.to_string(),
        }
    }

    pub fn skel_path(&self, url: &Url) -> PathBuf {
        self.skel_root.join(Self::relative(url))
    }

    pub fn mirror_path(&self, url: &Url) -> PathBuf {
        self.mirror_root.join(Self::relative(url))
    }
}

/// Asks dpkg for the host architecture, once, at startup.
pub fn detect_default_arch() -> String {
    let output = std::process::Command::new("dpkg")
        .arg("--print-architecture")
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let arch = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if arch.is_empty() {
                FALLBACK_ARCHITECTURE.to_string()
            } else {
                arch
            }
        }
        _ => {
            warn!(
                "Cannot run `dpkg --print-architecture` to fetch current architecture, use {}",
                FALLBACK_ARCHITECTURE
            );
            FALLBACK_ARCHITECTURE.to_string()
        }
    }
}

fn default_variables(default_arch: &str) -> HashMap<String, String> {
    [
        ("defaultarch", default_arch),
        ("base_path", "/var/spool/apt-mirror"),
        ("mirror_path", "/var/spool/apt-mirror/mirror"),
        ("skel_path", "/var/spool/apt-mirror/skel"),
        ("postmirror_script", ""),
        ("run_postmirror", "0"),
        ("nthreads", "20"),
        ("translations", "en"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Clean targets must carry a host.
fn parse_clean_target(target: &str) -> Result<Url> {
    let url = Url::parse(target)
        .map_err(|e| MirrorError::Config(format!("clean target {} is not a valid url: {}", target, e)))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(MirrorError::Config(format!("clean target {} has no host", target)));
    }
    Ok(url)
}

impl MirrorConfig {
    pub async fn load(path: &Path, default_arch: &str) -> Result<Self> {
        let contents = fs::read_to_string(path).await.map_err(|e| {
            MirrorError::Config(format!("Cannot read config from {}: {}", path.display(), e))
        })?;
        Self::parse(&contents, default_arch)
    }

    pub fn parse(text: &str, default_arch: &str) -> Result<Self> {
        let mut config = Self {
            variables: default_variables(default_arch),
            repositories: Vec::new(),
            clean: HashSet::new(),
        };

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix("set ") {
                let rest = rest.trim_start();
                let (name, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                if is_variable_name(name) {
                    let value = config.substitute(value.trim());
                    config.variables.insert(name.to_string(), value);
                }
                continue;
            }

            if line.starts_with("deb") {
                let arch = config.variable("defaultarch").to_string();
                for repo in parse_repo(line, &arch)? {
                    if !config.repositories.contains(&repo) {
                        config.repositories.push(repo);
                    }
                }
                continue;
            }

            if let Some(target) = line.strip_prefix("clean ") {
                config.clean.insert(parse_clean_target(target.trim())?);
            }
        }

        Ok(config)
    }

    /// Replaces `$name` references with current variable values, longest names first.
    fn substitute(&self, value: &str) -> String {
        let mut names: Vec<&String> = self.variables.keys().collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut out = value.to_string();
        for name in names {
            out = out.replace(&format!("${}", name), &self.variables[name]);
        }
        out
    }

    pub fn variable(&self, name: &str) -> &str {
        self.variables.get(name).map(String::as_str).unwrap_or("")
    }

    /// Integer value of a variable; 0 when missing or not a number.
    pub fn get_int(&self, name: &str) -> i64 {
        self.variable(name).trim().parse().unwrap_or(0)
    }

    pub fn worker_count(&self) -> usize {
        self.get_int("nthreads").max(1) as usize
    }

    /// Size of the download admission gate; follows `nthreads` unless `max_downloads` is set.
    pub fn max_downloads(&self) -> usize {
        match self.get_int("max_downloads") {
            n if n > 0 => n as usize,
            _ => self.worker_count(),
        }
    }

    /// Aggregate byte rate from the `ratelimit` variable (KiB/s).
    pub fn download_rate(&self) -> Option<u64> {
        match self.get_int("ratelimit") {
            n if n > 0 => Some(n as u64 * 1024),
            _ => None,
        }
    }

    pub fn translations(&self) -> Vec<String> {
        self.variable("translations")
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    pub fn paths(&self) -> MirrorPaths {
        MirrorPaths::new(self.variable("skel_path"), self.variable("mirror_path"))
    }
}
