//! Dataset input sources

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

/// Read-ahead for every source; records are small and read field by field.
const READ_AHEAD: usize = 128 * 1024;

/// Where a dataset comes from, decided by its path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// `-`
    Stdin,
    /// Any path without a `.gz` extension
    Plain(PathBuf),
    /// `.gz` extension, any case
    Gzip(PathBuf),
}

impl InputSource {
    pub fn from_path(path: &Path) -> Self {
        if path.as_os_str() == "-" {
            return InputSource::Stdin;
        }
        let gzip = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
        if gzip {
            InputSource::Gzip(path.to_path_buf())
        } else {
            InputSource::Plain(path.to_path_buf())
        }
    }

    /// Open the source for a single forward pass.
    ///
    /// The result is `Send` so it can move onto the loader thread.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(match self {
            InputSource::Stdin => Box::new(BufReader::with_capacity(READ_AHEAD, io::stdin())),
            InputSource::Plain(path) => {
                Box::new(BufReader::with_capacity(READ_AHEAD, File::open(path)?))
            }
            InputSource::Gzip(path) => {
                let compressed = File::open(path)?;
                Box::new(BufReader::with_capacity(READ_AHEAD, GzDecoder::new(compressed)))
            }
        })
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Stdin => f.write_str("<stdin>"),
            InputSource::Plain(path) => write!(f, "{}", path.display()),
            InputSource::Gzip(path) => write!(f, "{} (gzip)", path.display()),
        }
    }
}

/// Shorthand for `InputSource::from_path(path).open()`.
pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn Read + Send>> {
    InputSource::from_path(path.as_ref()).open()
}
