use std::{
    collections::HashMap,
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

use ssh2::{ErrorCode, FileStat, OpenType};

use crate::{
    engine::{OpenKind, RemoteHandle, SftpEngine, StatKind},
    error::{Error, Result, SftpCode, TransportCode},
    filesystem::{OpenFlags, RemoteAttributes, RenameFlags},
};

use super::transport_error;

/// libssh2's end-of-directory answer.
const END_OF_DIRECTORY: i32 = -16;

pub struct Ssh2Sftp {
    sftp: ssh2::Sftp,
    last_error: Option<Error>,
    files: HashMap<u64, OpenFile>,
    next_handle: u64,
}

struct OpenFile {
    file: ssh2::File,
    cursor: u64,
}

impl Ssh2Sftp {
    pub(crate) fn new(sftp: ssh2::Sftp) -> Ssh2Sftp {
        Ssh2Sftp {
            sftp,
            last_error: None,
            files: HashMap::new(),
            next_handle: 1,
        }
    }

    fn record(&mut self, err: ssh2::Error) -> Error {
        if let ErrorCode::SFTP(raw) = err.code() {
            self.last_error = Error::from_sftp_raw(raw as u32);
        }
        transport_error(&err)
    }

    fn record_io(&mut self, err: io::Error) -> Error {
        let inner = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ssh2::Error>())
            .map(|inner| ssh2::Error::new(inner.code(), "sftp i/o"));
        match inner {
            Some(inner) => self.record(inner),
            None => Error::Transport(TransportCode::SocketRecv),
        }
    }

    fn file(&mut self, handle: RemoteHandle) -> Result<&mut OpenFile> {
        if !self.files.contains_key(&handle.raw()) {
            self.last_error = Some(Error::Filesystem(SftpCode::InvalidHandle));
            return Err(Error::Transport(TransportCode::SftpProtocol));
        }
        self.files
            .get_mut(&handle.raw())
            .ok_or(Error::Transport(TransportCode::SftpProtocol))
    }
}

fn from_stat(stat: &FileStat) -> RemoteAttributes {
    let mut attributes = RemoteAttributes::new();
    if let Some(size) = stat.size {
        attributes = attributes.with_size(size);
    }
    if let (Some(uid), Some(gid)) = (stat.uid, stat.gid) {
        attributes = attributes.with_owner(uid, gid);
    }
    if let Some(perm) = stat.perm {
        attributes = attributes.with_permissions(perm);
    }
    if let (Some(atime), Some(mtime)) = (stat.atime, stat.mtime) {
        attributes = attributes.with_times(atime, mtime);
    }
    attributes
}

fn to_stat(attributes: &RemoteAttributes) -> FileStat {
    FileStat {
        size: attributes.size(),
        uid: attributes.uid(),
        gid: attributes.gid(),
        perm: attributes.permissions(),
        atime: attributes.atime(),
        mtime: attributes.mtime(),
    }
}

impl SftpEngine for Ssh2Sftp {
    fn last_error(&self) -> Option<Error> {
        self.last_error.clone()
    }

    fn open(&mut self, path: &str, flags: OpenFlags, permissions: u32, kind: OpenKind) -> Option<RemoteHandle> {
        self.last_error = None;
        let open_type = match kind {
            OpenKind::File => OpenType::File,
            OpenKind::Dir => OpenType::Dir,
        };
        let wire_flags = ssh2::OpenFlags::from_bits_truncate(flags.bits() as _);
        let opened = self
            .sftp
            .open_mode(Path::new(path), wire_flags, permissions as i32, open_type);
        match opened {
            Ok(file) => {
                let raw = self.next_handle;
                self.next_handle += 1;
                self.files.insert(raw, OpenFile { file, cursor: 0 });
                Some(RemoteHandle::new(raw))
            }
            Err(err) => {
                self.record(err);
                None
            }
        }
    }

    fn close(&mut self, handle: RemoteHandle) -> Result<()> {
        self.last_error = None;
        self.file(handle)?;
        let mut open = match self.files.remove(&handle.raw()) {
            Some(open) => open,
            None => return Err(Error::Transport(TransportCode::SftpProtocol)),
        };
        open.file.close().map_err(|err| self.record(err))
    }

    fn read(&mut self, handle: RemoteHandle, buf: &mut [u8]) -> Result<usize> {
        self.last_error = None;
        let open = self.file(handle)?;
        match open.file.read(buf) {
            Ok(read) => {
                open.cursor += read as u64;
                Ok(read)
            }
            Err(err) => Err(self.record_io(err)),
        }
    }

    fn write(&mut self, handle: RemoteHandle, buf: &[u8]) -> Result<usize> {
        self.last_error = None;
        let open = self.file(handle)?;
        match open.file.write(buf) {
            Ok(written) => {
                open.cursor += written as u64;
                Ok(written)
            }
            Err(err) => Err(self.record_io(err)),
        }
    }

    fn seek(&mut self, handle: RemoteHandle, offset: u64) {
        if let Some(open) = self.files.get_mut(&handle.raw()) {
            // libssh2_sftp_seek64 cannot fail for an absolute offset
            let _ = open.file.seek(SeekFrom::Start(offset));
            open.cursor = offset;
        }
    }

    fn tell(&self, handle: RemoteHandle) -> u64 {
        self.files
            .get(&handle.raw())
            .map(|open| open.cursor)
            .unwrap_or_default()
    }

    fn fstat(&mut self, handle: RemoteHandle) -> Result<RemoteAttributes> {
        self.last_error = None;
        let stat = self.file(handle)?.file.stat();
        stat.map(|stat| from_stat(&stat)).map_err(|err| self.record(err))
    }

    fn readdir(&mut self, handle: RemoteHandle, name: &mut [u8]) -> Result<Option<(usize, RemoteAttributes)>> {
        self.last_error = None;
        let entry = self.file(handle)?.file.readdir();
        let (path, stat) = match entry {
            Ok(entry) => entry,
            Err(err) if matches!(err.code(), ErrorCode::Session(END_OF_DIRECTORY)) => return Ok(None),
            Err(err) => return Err(self.record(err)),
        };
        let entry_name = path.to_string_lossy();
        let bytes = entry_name.as_bytes();
        if bytes.len() > name.len() {
            return Err(Error::Transport(TransportCode::BufferTooSmall));
        }
        name[..bytes.len()].copy_from_slice(bytes);
        Ok(Some((bytes.len(), from_stat(&stat))))
    }

    fn stat(&mut self, path: &str, kind: StatKind) -> Result<RemoteAttributes> {
        self.last_error = None;
        let stat = match kind {
            StatKind::Follow => self.sftp.stat(Path::new(path)),
            StatKind::NoFollow => self.sftp.lstat(Path::new(path)),
        };
        stat.map(|stat| from_stat(&stat)).map_err(|err| self.record(err))
    }

    fn setstat(&mut self, path: &str, attributes: &RemoteAttributes) -> Result<()> {
        self.last_error = None;
        let result = self.sftp.setstat(Path::new(path), to_stat(attributes));
        result.map_err(|err| self.record(err))
    }

    fn mkdir(&mut self, path: &str, permissions: u32) -> Result<()> {
        self.last_error = None;
        let result = self.sftp.mkdir(Path::new(path), permissions as i32);
        result.map_err(|err| self.record(err))
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        self.last_error = None;
        let result = self.sftp.rmdir(Path::new(path));
        result.map_err(|err| self.record(err))
    }

    fn unlink(&mut self, path: &str) -> Result<()> {
        self.last_error = None;
        let result = self.sftp.unlink(Path::new(path));
        result.map_err(|err| self.record(err))
    }

    fn rename(&mut self, old_path: &str, new_path: &str, flags: RenameFlags) -> Result<()> {
        self.last_error = None;
        let wire_flags = ssh2::RenameFlags::from_bits_truncate(flags.bits() as _);
        let result = self
            .sftp
            .rename(Path::new(old_path), Path::new(new_path), Some(wire_flags));
        result.map_err(|err| self.record(err))
    }

    fn shutdown(&mut self) -> Result<()> {
        self.files.clear();
        self.sftp.shutdown().map_err(|err| self.record(err))
    }
}
