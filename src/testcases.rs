// File: testcases.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::classify::Label;
use crate::config::TemplateSource;
use crate::error::{ReplayError, ReplayResult};
use log::{debug, info};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Enumerates and reads raw request templates.
pub trait TemplateLoader: Send + Sync {
    fn list(&self) -> ReplayResult<Vec<String>>;
    fn read(&self, identifier: &str) -> ReplayResult<Vec<u8>>;
}

macro_rules! embedded {
    ($($path:literal),* $(,)?) => {
        &[$(($path, include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/testcases/", $path)) as &[u8])),*]
    };
}

static EMBEDDED_CASES: &[(&str, &[u8])] = embedded![
    "benign/index.white",
    "benign/login-post.white",
    "benign/search.white",
    "benign/static-asset.white",
    "cmdi/semicolon-cat.http",
    "log4shell/jndi-header.http",
    "sqli/boolean-blind-post.http",
    "sqli/union-select.http",
    "ssrf/metadata.http",
    "traversal/etc-passwd.http",
    "xss/reflected-script.http",
    "xss/svg-onload-post.http",
];

/// Sample corpus compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedLoader;

impl TemplateLoader for EmbeddedLoader {
    fn list(&self) -> ReplayResult<Vec<String>> {
        Ok(EMBEDDED_CASES
            .iter()
            .map(|(path, _)| path.to_string())
            .collect())
    }

    fn read(&self, identifier: &str) -> ReplayResult<Vec<u8>> {
        EMBEDDED_CASES
            .iter()
            .find(|(path, _)| *path == identifier)
            .map(|(_, bytes)| bytes.to_vec())
            .ok_or_else(|| ReplayError::NotFound(identifier.to_string()))
    }
}

/// Templates stored under a directory (walked recursively) or a single file.
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn walk(dir: &Path, files: &mut Vec<String>) -> ReplayResult<()> {
        let entries = fs::read_dir(dir).map_err(|e| ReplayError::io(&dir.to_string_lossy(), &e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ReplayError::io(&dir.to_string_lossy(), &e))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|e| ReplayError::io(&path.to_string_lossy(), &e))?;
            if file_type.is_dir() {
                Self::walk(&path, files)?;
            } else if file_type.is_symlink() && path.is_dir() {
                debug!("not following directory link {}", path.display());
            } else {
                files.push(path.to_string_lossy().into_owned());
            }
        }
        Ok(())
    }
}

impl TemplateLoader for FsLoader {
    fn list(&self) -> ReplayResult<Vec<String>> {
        let root = self.root.to_string_lossy();
        let metadata = fs::metadata(&self.root).map_err(|e| ReplayError::io(&root, &e))?;
        if metadata.is_file() {
            return Ok(vec![root.into_owned()]);
        }
        let mut files = Vec::new();
        Self::walk(&self.root, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn read(&self, identifier: &str) -> ReplayResult<Vec<u8>> {
        fs::read(identifier).map_err(|e| ReplayError::io(identifier, &e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    identifier: String,
    label: Label,
}

impl TestCase {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            label: Label::from_identifier(identifier),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn label(&self) -> Label {
        self.label
    }
}

/// The ordered, read-only set of cases for one run and the loader that
/// serves their bytes.
#[derive(Clone)]
pub struct TestCaseSource {
    loader: Arc<dyn TemplateLoader>,
    cases: Arc<[TestCase]>,
}

impl TestCaseSource {
    pub fn load(loader: Arc<dyn TemplateLoader>, filter: Option<&str>) -> ReplayResult<Self> {
        let filter = filter
            .map(Regex::new)
            .transpose()
            .map_err(|e| ReplayError::InvalidConfig(format!("filter: {}", e)))?;

        let cases: Vec<TestCase> = loader
            .list()?
            .iter()
            .filter(|id| filter.as_ref().map_or(true, |re| re.is_match(id)))
            .map(|id| TestCase::new(id))
            .collect();

        if cases.is_empty() {
            return Err(ReplayError::EmptyCorpus);
        }
        info!("loaded {} test cases", cases.len());
        debug!(
            "{} benign, {} malicious",
            cases.iter().filter(|c| c.label() == Label::Benign).count(),
            cases.iter().filter(|c| c.label() == Label::Malicious).count()
        );

        Ok(Self {
            loader,
            cases: cases.into(),
        })
    }

    pub fn from_config(source: &TemplateSource, filter: Option<&str>) -> ReplayResult<Self> {
        let loader: Arc<dyn TemplateLoader> = match source {
            TemplateSource::Embedded => Arc::new(EmbeddedLoader),
            TemplateSource::Path(path) => Arc::new(FsLoader::new(path)),
        };
        Self::load(loader, filter)
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn read(&self, case: &TestCase) -> ReplayResult<Vec<u8>> {
        self.loader.read(case.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_embedded_corpus_lists_and_reads() {
        let loader = EmbeddedLoader;
        let ids = loader.list().unwrap();
        assert_eq!(ids.len(), 12);
        for id in &ids {
            assert!(!loader.read(id).unwrap().is_empty(), "{} is empty", id);
        }
        assert!(matches!(
            loader.read("missing.http"),
            Err(ReplayError::NotFound(_))
        ));
    }

    #[test]
    fn test_embedded_corpus_labels() {
        let source = TestCaseSource::load(Arc::new(EmbeddedLoader), None).unwrap();
        let benign = source
            .cases()
            .iter()
            .filter(|c| c.label() == Label::Benign)
            .count();
        assert_eq!(benign, 4);
        assert_eq!(source.len() - benign, 8);
    }

    #[test]
    fn test_fs_loader_walks_sorted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        fs::write(dir.path().join("b/nested/2.http"), b"GET / HTTP/1.1\r\n\r\n").unwrap();
        fs::write(dir.path().join("a.white"), b"GET / HTTP/1.1\r\n\r\n").unwrap();
        fs::write(dir.path().join("b/1.http"), b"GET / HTTP/1.1\r\n\r\n").unwrap();

        let loader = FsLoader::new(dir.path());
        let ids = loader.list().unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids[0].ends_with("a.white"));
        assert!(ids[1].ends_with("1.http"));
        assert!(ids[2].ends_with("2.http"));
        assert_eq!(loader.read(&ids[0]).unwrap(), b"GET / HTTP/1.1\r\n\r\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_fs_loader_skips_directory_links() {
        let dir = TempDir::new().unwrap();
        let sqli = dir.path().join("sqli");
        fs::create_dir(&sqli).unwrap();
        fs::write(sqli.join("01.http"), "GET /?id=1' HTTP/1.1\r\n\r\n").unwrap();
        fs::write(dir.path().join("home.white"), "GET / HTTP/1.1\r\n\r\n").unwrap();
        std::os::unix::fs::symlink(dir.path(), sqli.join("loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("home.white"), dir.path().join("alias.white"))
            .unwrap();

        let files = FsLoader::new(dir.path()).list().unwrap();
        let names: Vec<&str> = files
            .iter()
            .map(|f| f.strip_prefix(dir.path().to_str().unwrap()).unwrap())
            .collect();
        assert_eq!(names, vec!["/alias.white", "/home.white", "/sqli/01.http"]);
    }

    #[test]
    fn test_fs_loader_single_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("one.http");
        fs::write(&file, b"GET / HTTP/1.1\r\n\r\n").unwrap();

        let ids = FsLoader::new(&file).list().unwrap();
        assert_eq!(ids, vec![file.to_string_lossy().into_owned()]);
    }

    #[test]
    fn test_fs_loader_missing_path() {
        let dir = TempDir::new().unwrap();
        let loader = FsLoader::new(dir.path().join("nope"));
        assert!(matches!(loader.list(), Err(ReplayError::NotFound(_))));
    }

    #[test]
    fn test_filter_narrows_cases() {
        let source = TestCaseSource::load(Arc::new(EmbeddedLoader), Some("^sqli/")).unwrap();
        assert_eq!(source.len(), 2);
        assert!(source
            .cases()
            .iter()
            .all(|c| c.identifier().starts_with("sqli/")));
    }

    #[test]
    fn test_empty_corpus_is_fatal() {
        let dir = TempDir::new().unwrap();
        let result = TestCaseSource::load(Arc::new(FsLoader::new(dir.path())), None);
        assert!(matches!(result, Err(ReplayError::EmptyCorpus)));

        let result = TestCaseSource::load(Arc::new(EmbeddedLoader), Some("^nothing$"));
        assert!(matches!(result, Err(ReplayError::EmptyCorpus)));
    }
}
