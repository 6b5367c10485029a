use crate::error::{Error, Result};
use crate::transport::BulkTransport;
use crate::UPLOAD_CHUNK_SIZE;
use std::convert::TryFrom;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// A long-running transfer which reports its progress step by step.
///
/// Each item is the number of bytes handled so far, or the error which ended the operation. The
/// iterator is fused after an error.
pub trait Operation: Iterator<Item = Result<usize>> {
    fn total(&self) -> usize;

    fn execute(&mut self) -> Result<()> {
        if let Some(Err(error)) = self.last() {
            Err(error)
        } else {
            Ok(())
        }
    }
}

/// A boot image of known length to be uploaded.
pub struct Image<R> {
    reader: R,
    len: u32,
}

impl Image<File> {
    /// Opens an image file. Its size is taken from the file metadata.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(Error::Io)?;
        let size = file.metadata().map_err(Error::Io)?.len();
        let len = u32::try_from(size).map_err(|_| {
            Error::Configuration(format!(
                "{} is too large for the upload header ({} bytes)",
                path.as_ref().display(),
                size
            ))
        })?;
        Ok(Image::new(file, len))
    }
}

impl<'a> Image<&'a [u8]> {
    /// An image held in memory.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self> {
        let len = u32::try_from(data.len()).map_err(|_| {
            Error::Configuration(format!(
                "image of {} bytes is too large for the upload header",
                data.len()
            ))
        })?;
        Ok(Image::new(data, len))
    }
}

impl<R: Read> Image<R> {
    /// An image read from `reader`, which has to deliver at least `len` bytes. Anything beyond is
    /// ignored.
    pub fn new(reader: R, len: u32) -> Self {
        Image { reader, len }
    }

    /// Length announced in the upload header.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Uploads an image: a little-endian `u32` length header, then the image in chunks. The ROM sends
/// no acknowledgement, so a failed write ends the upload right away.
pub struct Upload<'a, T: BulkTransport + ?Sized, R: Read> {
    transport: &'a mut T,
    reader: io::Take<R>,
    buffer: Vec<u8>,
    length: usize,
    sent: usize,
    header_sent: bool,
    done: bool,
}

impl<'a, T: BulkTransport + ?Sized, R: Read> Upload<'a, T, R> {
    pub fn new(transport: &'a mut T, image: Image<R>, chunk_size: usize) -> Self {
        let length = image.len as usize;
        Self {
            transport,
            reader: image.reader.take(u64::from(image.len)),
            buffer: vec![0u8; chunk_size.max(1)],
            length,
            sent: 0,
            header_sent: false,
            done: false,
        }
    }

    /// Uploads with the default chunk size.
    pub fn with_default_chunks(transport: &'a mut T, image: Image<R>) -> Self {
        Self::new(transport, image, UPLOAD_CHUNK_SIZE)
    }

    fn send_header(&mut self) -> Result<usize> {
        let header = (self.length as u32).to_le_bytes();
        self.transport.write(&header)?;
        self.header_sent = true;
        if self.length == 0 {
            self.done = true;
        }
        Ok(0)
    }

    fn send_chunk(&mut self) -> Result<usize> {
        let wanted = self.buffer.len().min(self.length - self.sent);
        let count = loop {
            match self.reader.read(&mut self.buffer[..wanted]) {
                Ok(count) => break count,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::Io(err)),
            }
        };

        // The image ran dry before delivering what the header announced
        if count == 0 {
            return Err(Error::Framing {
                expected: self.length,
                actual: self.sent,
            });
        }

        self.transport.write(&self.buffer[..count])?;
        self.sent += count;
        if self.sent == self.length {
            self.done = true;
        }
        Ok(self.sent)
    }
}

impl<T: BulkTransport + ?Sized, R: Read> Operation for Upload<'_, T, R> {
    fn total(&self) -> usize {
        self.length
    }
}

impl<T: BulkTransport + ?Sized, R: Read> Iterator for Upload<'_, T, R> {
    type Item = Result<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let step = if self.header_sent {
            self.send_chunk()
        } else {
            self.send_header()
        };

        // Ensure that the iterator is fused after an error occurs
        if step.is_err() {
            self.done = true;
        }
        Some(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::MockTransport;

    fn image_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn header_then_payload() {
        for &size in &[0usize, 1, 100, 4096, 4097, 10_000] {
            let data = image_data(size);
            let mut transport = MockTransport::new();
            Upload::new(&mut transport, Image::from_bytes(&data).unwrap(), 4096)
                .execute()
                .unwrap();

            let written = transport.written();
            assert_eq!(written.len(), size + 4);
            assert_eq!(&written[..4], &(size as u32).to_le_bytes());
            assert_eq!(&written[4..], data.as_slice());
        }
    }

    #[test]
    fn chunks_are_bounded() {
        let data = image_data(1000);
        let mut transport = MockTransport::new();
        let image = Image::from_bytes(&data).unwrap();
        let progress: Vec<usize> = Upload::new(&mut transport, image, 256)
            .map(|step| step.unwrap())
            .collect();

        assert_eq!(progress, vec![0, 256, 512, 768, 1000]);
        let writes = transport.writes();
        assert_eq!(writes.len(), 5);
        assert!(writes[1..].iter().all(|chunk| chunk.len() <= 256));
    }

    #[test]
    fn total_is_image_length() {
        let data = image_data(42);
        let mut transport = MockTransport::new();
        let image = Image::from_bytes(&data).unwrap();
        let upload = Upload::with_default_chunks(&mut transport, image);
        assert_eq!(upload.total(), 42);
    }

    #[test]
    fn write_failure_aborts() {
        let data = image_data(1000);
        let mut transport = MockTransport::new().fail_write_at(2);
        let image = Image::from_bytes(&data).unwrap();
        let mut upload = Upload::new(&mut transport, image, 100);

        assert_eq!(upload.next().unwrap().unwrap(), 0);
        assert_eq!(upload.next().unwrap().unwrap(), 100);
        assert_eq!(upload.next().unwrap().unwrap_err().kind(), ErrorKind::Transport);
        assert!(upload.next().is_none());
        drop(upload);
        assert_eq!(transport.written().len(), 104);
    }

    #[test]
    fn short_source_is_a_framing_error() {
        let data = image_data(10);
        let mut transport = MockTransport::new();
        let result = Upload::new(&mut transport, Image::new(&data[..], 20), 4096).execute();

        match result {
            Err(Error::Framing { expected, actual }) => {
                assert_eq!(expected, 20);
                assert_eq!(actual, 10);
            }
            other => panic!("expected framing error, got {:?}", other),
        }
    }

    #[test]
    fn excess_source_is_not_sent() {
        let data = image_data(10);
        let mut transport = MockTransport::new();
        Upload::new(&mut transport, Image::new(&data[..], 6), 4096)
            .execute()
            .unwrap();
        assert_eq!(&transport.written()[4..], &data[..6]);
    }
}
