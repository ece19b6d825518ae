//! Raw character-device byte pipe (`/dev/usb/lp0`-style nodes), for
//! printers exposed through the kernel's `usblp`/parport drivers instead of
//! being addressed directly via USB.

use super::{Error, Pipe, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Default single-transfer read size when the caller doesn't cap it.
const DEFAULT_READ_SIZE: usize = 4096;

#[derive(Debug)]
pub struct FilePipe {
    path: PathBuf,
    file: Option<File>,
}

impl FilePipe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Globs the usual character-device paths for parallel/usblp nodes.
    pub fn discover() -> Vec<FilePipe> {
        let mut found = Vec::new();
        for pattern_dir in ["/dev", "/dev/usb"] {
            let dir = match std::fs::read_dir(pattern_dir) {
                Ok(d) => d,
                Err(_) => continue,
            };
            for entry in dir.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                let suffix = name.strip_prefix("lp");
                let is_lp_node = matches!(suffix, Some(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()));
                if is_lp_node && is_char_device(&entry.path()) {
                    found.push(FilePipe::new(entry.path()));
                }
            }
        }
        found
    }
}

#[cfg(unix)]
fn is_char_device(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path)
        .map(|m| m.file_type().is_char_device())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_char_device(_path: &Path) -> bool {
    false
}

impl Pipe for FilePipe {
    fn open(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .append(true)
            .open(&self.path)?;
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.file = None;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        use std::io::Write;
        let file = self.file.as_mut().ok_or_else(|| {
            Error::NoMatchingInterface(format!("{} not open", self.path.display()))
        })?;
        Ok(file.write(data)?)
    }

    fn read(&mut self, max: Option<usize>) -> Result<Vec<u8>> {
        use std::io::Read;
        let file = self.file.as_mut().ok_or_else(|| {
            Error::NoMatchingInterface(format!("{} not open", self.path.display()))
        })?;
        let mut buf = vec![0u8; max.unwrap_or(DEFAULT_READ_SIZE)];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}
