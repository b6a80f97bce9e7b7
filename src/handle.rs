use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::{debug, warn};

use crate::{
    engine::{RemoteHandle, SftpEngine, TransportEngine},
    error::{Error, Result},
    filesystem::Metadata,
    sftp::SftpSession,
};

/// An open remote file. The cursor is kept by the engine.
pub struct File<'s, E>
where
    E: TransportEngine,
{
    sftp: &'s SftpSession<'s, E>,
    handle: RemoteHandle,
    open: bool,
}

impl<'s, E> File<'s, E>
where
    E: TransportEngine,
{
    pub(crate) fn new(sftp: &'s SftpSession<'s, E>, handle: RemoteHandle) -> File<'s, E> {
        File {
            sftp,
            handle,
            open: true,
        }
    }

    /// Reads at the cursor. An empty `buf` returns `Ok(0)` without touching the
    /// remote side; end of file is [`Error::Eof`].
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let result = self.sftp.channel.borrow_mut().read(self.handle, buf);
        match result {
            Ok(0) => Err(Error::Eof),
            Ok(read) => Ok(read),
            Err(err) => Err(self.sftp.settle(err)),
        }
    }

    /// Writes all of `buf`, issuing as many remote writes as the engine needs.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let result = self.sftp.channel.borrow_mut().write(self.handle, &buf[written..]);
            match result {
                Ok(0) => {
                    return Err(Error::Unknown(format!(
                        "remote write stalled after {} of {} bytes",
                        written,
                        buf.len()
                    )))
                }
                Ok(accepted) => written += accepted,
                Err(err) => return Err(self.sftp.settle(err)),
            }
        }
        Ok(written)
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<usize> {
        self.write(buf)
    }

    pub fn seek(&mut self, offset: u64) {
        self.sftp.channel.borrow_mut().seek(self.handle, offset);
    }

    pub fn rewind(&mut self) {
        self.seek(0);
    }

    pub fn tell(&self) -> u64 {
        self.sftp.channel.borrow().tell(self.handle)
    }

    /// Attributes of the open file. The name is empty, a handle has none.
    pub fn stat(&self) -> Result<Metadata> {
        let result = self.sftp.channel.borrow_mut().fstat(self.handle);
        let attributes = result.map_err(|err| self.sftp.settle(err))?;
        Ok(Metadata::new("", attributes))
    }

    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        release_handle(self.sftp, self.handle)
    }
}

impl<E> Drop for File<'_, E>
where
    E: TransportEngine,
{
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("Failed to close remote file: {}", err);
        }
    }
}

impl<E> Read for File<'_, E>
where
    E: TransportEngine,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match File::read(self, buf) {
            Ok(read) => Ok(read),
            Err(Error::Eof) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

impl<E> Write for File<'_, E>
where
    E: TransportEngine,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        File::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<E> Seek for File<'_, E>
where
    E: TransportEngine,
{
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (base, delta) = match pos {
            SeekFrom::Start(offset) => {
                File::seek(self, offset);
                return Ok(offset);
            }
            SeekFrom::Current(delta) => (self.tell(), delta),
            SeekFrom::End(delta) => {
                let size = self.stat()?.len().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::Unsupported, "remote file size is unknown")
                })?;
                (size, delta)
            }
        };
        let offset = base
            .checked_add_signed(delta)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file"))?;
        File::seek(self, offset);
        Ok(offset)
    }
}

/// An open remote directory.
pub struct Dir<'s, E>
where
    E: TransportEngine,
{
    sftp: &'s SftpSession<'s, E>,
    handle: RemoteHandle,
    name: Vec<u8>,
    open: bool,
}

impl<'s, E> Dir<'s, E>
where
    E: TransportEngine,
{
    pub(crate) fn new(sftp: &'s SftpSession<'s, E>, handle: RemoteHandle) -> Dir<'s, E> {
        Dir {
            sftp,
            handle,
            name: vec![0; sftp.name_buffer_len()],
            open: true,
        }
    }

    /// Next entry other than `.` and `..`, `Ok(None)` once the listing is exhausted.
    ///
    /// A name that does not fit the configured name buffer fails with
    /// [`TransportCode::BufferTooSmall`](crate::TransportCode); the entry is
    /// consumed and the following call moves on.
    pub fn next_entry(&mut self) -> Result<Option<Metadata>> {
        loop {
            let result = self.sftp.channel.borrow_mut().readdir(self.handle, &mut self.name);
            let (len, attributes) = match result.map_err(|err| self.sftp.settle(err))? {
                Some(entry) => entry,
                None => return Ok(None),
            };
            let name = String::from_utf8_lossy(&self.name[..len]);
            if name == "." || name == ".." {
                continue;
            }
            return Ok(Some(Metadata::new(name, attributes)));
        }
    }

    pub fn stat(&self) -> Result<Metadata> {
        let result = self.sftp.channel.borrow_mut().fstat(self.handle);
        let attributes = result.map_err(|err| self.sftp.settle(err))?;
        Ok(Metadata::new("", attributes))
    }

    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        release_handle(self.sftp, self.handle)
    }
}

impl<E> Drop for Dir<'_, E>
where
    E: TransportEngine,
{
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("Failed to close remote directory: {}", err);
        }
    }
}

fn release_handle<E>(sftp: &SftpSession<'_, E>, handle: RemoteHandle) -> Result<()>
where
    E: TransportEngine,
{
    let result = sftp.channel.borrow_mut().close(handle);
    debug!("Closed remote handle {}", handle.raw());
    result.map_err(|err| sftp.settle(err))
}
