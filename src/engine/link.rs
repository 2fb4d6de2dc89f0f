// Link Builder
use std::fs;
use std::path::Path;

use parking_lot::Mutex;

use super::handle::Handle;
use crate::error::{Error, Result};

pub type LinkHandle = Handle<Link>;

/// One named piece of kernel source. Names are for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub name: String,
    pub source: Vec<u8>,
}

#[derive(Debug, Default)]
struct LinkState {
    fragments: Vec<Fragment>,
    sealed: bool,
}

/// Ordered fragments awaiting compilation. The first compile seals the link:
/// it stays compilable but accepts no more fragments.
#[derive(Debug)]
pub struct Link {
    state: Mutex<LinkState>,
    max_fragments: usize,
}

impl Link {
    pub fn new(max_fragments: usize) -> Self {
        Self {
            state: Mutex::new(LinkState::default()),
            max_fragments,
        }
    }

    pub fn add_data(&self, source: &[u8], name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(Error::LinkSealed);
        }
        if state.fragments.len() >= self.max_fragments {
            return Err(Error::LinkFull(self.max_fragments));
        }
        state.fragments.push(Fragment {
            name: name.to_string(),
            source: source.to_vec(),
        });
        Ok(())
    }

    /// Reads `path` now; the fragment is named after the path.
    pub fn add_file(&self, path: &Path) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::LinkSealed);
        }
        let source = fs::read(path).map_err(|source| Error::SourceNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        self.add_data(&source, &path.display().to_string())
    }

    pub fn len(&self) -> usize {
        self.state.lock().fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Seal the link and return its fragments in append order.
    pub(crate) fn seal(&self) -> Vec<Fragment> {
        let mut state = self.state.lock();
        state.sealed = true;
        state.fragments.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sealing_blocks_further_appends() {
        let link = Link::new(8);
        link.add_data(b"void main() {}", "main").unwrap();
        assert!(!link.is_sealed());
        let fragments = link.seal();
        assert!(link.is_sealed());
        assert_eq!(fragments.len(), 1);
        assert!(matches!(link.add_data(b"", "late"), Err(Error::LinkSealed)));
        assert_eq!(link.seal(), fragments);
    }

    #[test]
    fn fragment_limit() {
        let link = Link::new(1);
        link.add_data(b"a", "a").unwrap();
        assert!(matches!(link.add_data(b"b", "b"), Err(Error::LinkFull(1))));
    }

    #[test]
    fn files_are_read_when_added() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "void main() {{}}").unwrap();
        let link = Link::new(8);
        link.add_file(file.path()).unwrap();
        drop(file);
        let fragments = link.seal();
        assert_eq!(fragments[0].source, b"void main() {}");
    }

    #[test]
    fn missing_file_is_source_not_found() {
        let link = Link::new(8);
        let err = link.add_file(Path::new("/nonexistent/kernel.glsl")).unwrap_err();
        assert!(matches!(err, Error::SourceNotFound { .. }));
        assert!(link.is_empty());
    }
}
