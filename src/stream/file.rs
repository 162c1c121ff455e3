use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use super::{ByteSource, SeekStrategy, StreamError, StreamResult};

const FILE_READ_CHUNK: usize = 64 * 1024;

/// Random-access source over a file on disk.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    position: u64,
    length: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> StreamResult<Self> {
        let file = File::open(path)?;
        Self::from_file(file)
    }

    pub fn from_file(mut file: File) -> StreamResult<Self> {
        let length = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            file,
            position: 0,
            length,
        })
    }
}

impl ByteSource for FileSource {
    fn read_more(&mut self, out: &mut Vec<u8>, max: usize) -> StreamResult<usize> {
        let remaining = self.length.saturating_sub(self.position);
        let wanted = (max.min(FILE_READ_CHUNK) as u64).min(remaining) as usize;
        if wanted == 0 {
            return Ok(0);
        }
        let start = out.len();
        out.resize(start + wanted, 0);
        let read = match self.file.read(&mut out[start..]) {
            Ok(read) => read,
            Err(err) => {
                out.truncate(start);
                return Err(err.into());
            }
        };
        out.truncate(start + read);
        if read == 0 {
            return Err(StreamError::protocol(format!(
                "file ended at {} before its recorded length {}",
                self.position, self.length
            )));
        }
        self.position += read as u64;
        Ok(read)
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.length
    }

    fn length(&mut self) -> StreamResult<Option<u64>> {
        Ok(Some(self.length))
    }

    fn seek_strategy(&self) -> SeekStrategy {
        SeekStrategy::RandomAccess
    }

    fn reposition(&mut self, offset: u64) -> StreamResult<()> {
        if offset > self.length {
            return Err(StreamError::NotEnoughData {
                requested: offset,
                available: self.length,
            });
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::stream::{ByteStream, PullMode};

    #[test]
    fn file_stream_seeks_back_past_lookbehind() -> StreamResult<()> {
        let mut file = tempfile::tempfile()?;
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        file.write_all(&data)?;

        let mut stream = ByteStream::new(FileSource::from_file(file)?).with_max_lookbehind(16);
        assert_eq!(stream.length()?, Some(4096));
        stream.pull(1024, PullMode::Exactly)?;
        stream.consume(1024)?;
        assert!(stream.bytes_already_forgotten() > 0);

        stream.seek(7)?;
        stream.pull(3, PullMode::Exactly)?;
        assert_eq!(stream.consume(3)?, vec![7, 8, 9]);
        Ok(())
    }
}
