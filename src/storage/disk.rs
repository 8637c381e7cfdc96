use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PAGE_SIZE;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Fixed-size page I/O over one table's backing file.
///
/// The file is a flat concatenation of PAGE_SIZE pages; page index =
/// byte offset / PAGE_SIZE.
pub struct DiskManager {
    file: File,
}

impl DiskManager {
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    pub fn read_page(&mut self, page_no: u32, buf: &mut [u8]) -> StorageResult<()> {
        if buf.len() != PAGE_SIZE {
            return Err(StorageError::Corrupted(format!(
                "read buffer is {} bytes, expected {}",
                buf.len(),
                PAGE_SIZE
            )));
        }
        self.file.seek(SeekFrom::Start(Self::offset(page_no)))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_page(&mut self, page_no: u32, data: &[u8]) -> StorageResult<()> {
        if data.len() != PAGE_SIZE {
            return Err(StorageError::Corrupted(format!(
                "write buffer is {} bytes, expected {}",
                data.len(),
                PAGE_SIZE
            )));
        }
        self.file.seek(SeekFrom::Start(Self::offset(page_no)))?;
        self.file.write_all(data)?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as u32)
    }

    fn offset(page_no: u32) -> u64 {
        page_no as u64 * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open() -> StorageResult<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        {
            let dm = DiskManager::create(&path)?;
            assert_eq!(dm.num_pages()?, 0);
        }
        {
            let dm = DiskManager::open(&path)?;
            assert_eq!(dm.num_pages()?, 0);
        }
        assert!(DiskManager::open(&dir.path().join("missing.dat")).is_err());
        Ok(())
    }

    #[test]
    fn test_write_then_read() -> StorageResult<()> {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(&dir.path().join("table.dat"))?;

        let mut data = vec![0u8; PAGE_SIZE];
        data[0] = 42;
        data[PAGE_SIZE - 1] = 24;
        dm.write_page(0, &data)?;

        let mut buf = vec![0u8; PAGE_SIZE];
        dm.read_page(0, &mut buf)?;
        assert_eq!(buf[0], 42);
        assert_eq!(buf[PAGE_SIZE - 1], 24);
        Ok(())
    }

    #[test]
    fn test_pages_do_not_overlap() -> StorageResult<()> {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(&dir.path().join("table.dat"))?;

        dm.write_page(0, &vec![1u8; PAGE_SIZE])?;
        dm.write_page(1, &vec![2u8; PAGE_SIZE])?;
        assert_eq!(dm.num_pages()?, 2);

        let mut buf = vec![0u8; PAGE_SIZE];
        dm.read_page(0, &mut buf)?;
        assert!(buf.iter().all(|&b| b == 1));
        dm.read_page(1, &mut buf)?;
        assert!(buf.iter().all(|&b| b == 2));
        Ok(())
    }

    #[test]
    fn test_read_past_end_fails() -> StorageResult<()> {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(&dir.path().join("table.dat"))?;

        let mut buf = vec![0u8; PAGE_SIZE];
        assert!(dm.read_page(3, &mut buf).is_err());
        Ok(())
    }

    #[test]
    fn test_wrong_buffer_size_rejected() -> StorageResult<()> {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(&dir.path().join("table.dat"))?;

        let mut small = vec![0u8; 100];
        assert!(dm.read_page(0, &mut small).is_err());
        assert!(dm.write_page(0, &small).is_err());
        Ok(())
    }
}
