use std::fs::File;
use crate::core::error::{Error, ErrorKind, Result};

/// Backing bytes for the block store.
pub trait Medium: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Current length in bytes as last observed by this handle
    fn len(&self) -> u64;

    fn set_len(&mut self, len: u64) -> Result<()>;

    fn sync(&mut self) -> Result<()>;

    /// Re-read the length from the backing object (readers following a writer)
    fn refresh_len(&mut self) -> Result<u64> {
        Ok(self.len())
    }

    fn name(&self) -> &str;
}

/// File-backed medium using positioned I/O, so reads need only `&self`.
pub struct FileMedium {
    pub file: File,
    len: u64,
}

impl FileMedium {
    pub fn new(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(FileMedium { file, len })
    }
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn pwrite(file: &File, data: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn pread(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset)? {
            0 => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            n => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(windows)]
fn pwrite(file: &File, mut data: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !data.is_empty() {
        let n = file.seek_write(data, offset)?;
        data = &data[n..];
        offset += n as u64;
    }
    Ok(())
}

impl Medium for FileMedium {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        pread(&self.file, buf, offset).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::corrupt(format!(
                "read of {} bytes at {} past end of file",
                buf.len(),
                offset
            )),
            _ => Error::from(e),
        })
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        pwrite(&self.file, data, offset)?;
        self.len = self.len.max(offset + data.len() as u64);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.len = len;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn refresh_len(&mut self) -> Result<u64> {
        self.len = self.file.metadata()?.len();
        Ok(self.len)
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Process-local medium. Contents vanish with the handle.
pub struct MemoryMedium {
    pub data: Vec<u8>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        MemoryMedium { data: Vec::new() }
    }
}

impl Medium for MemoryMedium {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start.checked_add(buf.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::corrupt(format!("read at {} past end of memory medium", offset)))?;
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| Error::new(ErrorKind::OutOfSpace, format!("memory medium cannot hold {} bytes", len)))?;
        self.data.resize(len, 0);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
