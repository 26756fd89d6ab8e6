use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A scratch file that unlinks itself on drop unless it has been persisted
/// to a final destination. Request bodies over the spill threshold and
/// multipart file parts land here.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    file: File,
    len: u64,
    persisted: bool,
}

impl TempFile {
    pub fn create() -> io::Result<TempFile> {
        let path = std::env::temp_dir().join(format!(
            "webserv-{}-{:016x}",
            std::process::id(),
            rand::random::<u64>()
        ));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(TempFile {
            path,
            file,
            len: 0,
            persisted: false,
        })
    }

    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.len += data.len() as u64;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read handle independent of the write position.
    pub fn reopen(&self) -> io::Result<File> {
        File::open(&self.path)
    }

    /// Moves the file to `dest`, atomically when the temp directory and the
    /// destination share a filesystem, falling back to copy + unlink.
    pub fn persist(mut self, dest: &Path) -> io::Result<()> {
        self.file.flush()?;
        if fs::rename(&self.path, dest).is_err() {
            fs::copy(&self.path, dest)?;
            fs::remove_file(&self.path)?;
        }
        self.persisted = true;
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[derive(Debug)]
pub enum PartData {
    Bytes(Vec<u8>),
    File(TempFile),
}

/// One multipart/form-data part. A part with a filename is a file part and
/// carries its content in a temp file; a field part stays in memory.
#[derive(Debug)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: PartData,
}

impl Part {
    pub fn len(&self) -> u64 {
        match &self.data {
            PartData::Bytes(b) => b.len() as u64,
            PartData::File(f) => f.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Spilled(TempFile),
    Parts(Vec<Part>),
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Bytes(b) => b.len() as u64,
            Body::Spilled(f) => f.len(),
            Body::Parts(parts) => parts.iter().map(Part::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
