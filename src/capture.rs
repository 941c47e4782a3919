//! Writes raw page bodies to disk, one file per page, for inspection.
//!
//! Layout is `<dir>/<namespace>/<title>.txt`. Characters that are unsafe in
//! file names are percent-encoded, and long titles are cut and suffixed with
//! a hash of the full title so distinct titles never share a file.

use crate::config::CAPTURE_TITLE_MAX;
use crate::models::Namespace;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const HASH_CHARS: usize = 16;

pub struct PageCapture {
    dir: PathBuf,
}

impl PageCapture {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create capture directory: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn path_for(&self, namespace: Namespace, title: &str) -> PathBuf {
        capture_path(&self.dir, namespace, title)
    }

    pub fn write(&self, namespace: Namespace, title: &str, body: &str) -> Result<PathBuf> {
        let path = self.path_for(namespace, title);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(&path, body).with_context(|| format!("Failed to write page: {}", path.display()))?;
        debug!(title, path = %path.display(), "Page captured");
        Ok(path)
    }
}

pub fn capture_path(dir: &Path, namespace: Namespace, title: &str) -> PathBuf {
    let folder = match namespace.prefix() {
        Some(prefix) => prefix.to_string(),
        None => match namespace {
            Namespace::Other(id) => format!("ns{}", id),
            _ => "Main".to_string(),
        },
    };
    dir.join(folder).join(format!("{}.txt", safe_file_name(title)))
}

/// File-system safe form of a title.
pub fn safe_file_name(title: &str) -> String {
    let mut encoded = String::with_capacity(title.len());
    for c in title.chars() {
        push_encoded(&mut encoded, c);
    }
    if encoded.len() <= CAPTURE_TITLE_MAX {
        return encoded;
    }

    let budget = CAPTURE_TITLE_MAX - HASH_CHARS - 1;
    let mut cut = String::with_capacity(CAPTURE_TITLE_MAX);
    let mut piece = String::new();
    for c in title.chars() {
        piece.clear();
        push_encoded(&mut piece, c);
        if cut.len() + piece.len() > budget {
            break;
        }
        cut.push_str(&piece);
    }
    let digest = format!("{:x}", Sha256::digest(title.as_bytes()));
    cut.push('_');
    cut.push_str(&digest[..HASH_CHARS]);
    cut
}

fn push_encoded(out: &mut String, c: char) {
    let unsafe_char = matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%')
        || c.is_control()
        || (out.is_empty() && c == '.');
    if unsafe_char {
        let mut buf = [0u8; 4];
        for byte in c.encode_utf8(&mut buf).bytes() {
            out.push_str(&format!("%{:02X}", byte));
        }
    } else {
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unsafe_characters_are_encoded() {
        assert_eq!(safe_file_name("cat"), "cat");
        assert_eq!(safe_file_name("AC/DC"), "AC%2FDC");
        assert_eq!(safe_file_name("100%"), "100%25");
        assert_eq!(safe_file_name(".hidden"), "%2Ehidden");
        assert_eq!(safe_file_name("a.b"), "a.b");
        assert_eq!(safe_file_name("kissa?"), "kissa%3F");
    }

    #[test]
    fn long_titles_are_truncated_with_hash() {
        let long = "x".repeat(300);
        let name = safe_file_name(&long);
        assert_eq!(name.len(), CAPTURE_TITLE_MAX);
        assert!(name.starts_with("xxxx"));
        let other = safe_file_name(&format!("{}y", "x".repeat(300)));
        assert_ne!(name, other);

        let slashes = "/".repeat(100);
        let name = safe_file_name(&slashes);
        assert!(name.len() <= CAPTURE_TITLE_MAX);
        assert!(name.split('_').next().unwrap().len() % 3 == 0);
    }

    #[test]
    fn namespaces_become_directories() {
        let dir = Path::new("/tmp/capture");
        assert_eq!(
            capture_path(dir, Namespace::Template, "en-noun"),
            dir.join("Template").join("en-noun.txt")
        );
        assert_eq!(
            capture_path(dir, Namespace::Module, "links/data"),
            dir.join("Module").join("links%2Fdata.txt")
        );
        assert_eq!(capture_path(dir, Namespace::Main, "cat"), dir.join("Main").join("cat.txt"));
    }

    #[test]
    fn write_creates_file() {
        let tmp = TempDir::new().unwrap();
        let capture = PageCapture::new(tmp.path()).unwrap();
        let path = capture.write(Namespace::Main, "cat", "==English==").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "==English==");
    }
}
