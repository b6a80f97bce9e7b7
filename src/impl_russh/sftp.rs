use std::{
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use russh_sftp::{
    client::{error::Error as SftpError, RawSftpSession},
    protocol::{File as NameEntry, FileAttributes, OpenFlags as WireOpenFlags, StatusCode},
};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::{
    engine::{OpenKind, RemoteHandle, SftpEngine, StatKind},
    error::{Error, Result, SftpCode, TransportCode},
    filesystem::{mode, OpenFlags, RemoteAttributes, RenameFlags},
};

/// Largest read or write issued as one request.
const MAX_CHUNK: usize = 32 * 1024;

/// SFTP channel over russh-sftp's request level client.
///
/// Handles, cursors and directory batches live here; the server only sees
/// absolute offsets.
pub struct RusshSftp {
    rt: Rc<Runtime>,
    raw: RawSftpSession,
    last_error: Option<Error>,
    handles: HashMap<u64, OpenRemote>,
    next_handle: u64,
}

struct OpenRemote {
    handle: String,
    cursor: u64,
    batch: VecDeque<NameEntry>,
    exhausted: bool,
}

impl RusshSftp {
    pub(crate) fn new(rt: Rc<Runtime>, raw: RawSftpSession) -> RusshSftp {
        RusshSftp {
            rt,
            raw,
            last_error: None,
            handles: HashMap::new(),
            next_handle: 1,
        }
    }

    /// A status reply is left in `last_error`; anything else failed below SFTP.
    fn record(&mut self, err: SftpError) -> Error {
        match err {
            SftpError::Status(status) => {
                self.last_error = Error::from_sftp_raw(status.status_code as u32);
                Error::Transport(TransportCode::SftpProtocol)
            }
            SftpError::Timeout => Error::Transport(TransportCode::Timeout),
            err => {
                debug!("SFTP request failed: {}", err);
                Error::Transport(TransportCode::SocketRecv)
            }
        }
    }

    fn remote(&mut self, handle: RemoteHandle) -> Result<&mut OpenRemote> {
        if !self.handles.contains_key(&handle.raw()) {
            return Err(self.invalid_handle());
        }
        self.handles
            .get_mut(&handle.raw())
            .ok_or(Error::Transport(TransportCode::SftpProtocol))
    }

    fn invalid_handle(&mut self) -> Error {
        self.last_error = Some(Error::Filesystem(SftpCode::InvalidHandle));
        Error::Transport(TransportCode::SftpProtocol)
    }
}

fn is_eof(err: &SftpError) -> bool {
    matches!(err, SftpError::Status(status) if matches!(status.status_code, StatusCode::Eof))
}

fn from_wire(attrs: &FileAttributes) -> RemoteAttributes {
    let mut attributes = RemoteAttributes::new();
    if let Some(size) = attrs.size {
        attributes = attributes.with_size(size);
    }
    if let (Some(uid), Some(gid)) = (attrs.uid, attrs.gid) {
        attributes = attributes.with_owner(uid, gid);
    }
    if let Some(permissions) = attrs.permissions {
        attributes = attributes.with_permissions(permissions);
    }
    if let (Some(atime), Some(mtime)) = (attrs.atime, attrs.mtime) {
        attributes = attributes.with_times(u64::from(atime), u64::from(mtime));
    }
    attributes
}

fn to_wire(attributes: &RemoteAttributes) -> FileAttributes {
    let mut attrs = FileAttributes::empty();
    attrs.size = attributes.size();
    attrs.uid = attributes.uid();
    attrs.gid = attributes.gid();
    attrs.permissions = attributes.permissions();
    attrs.atime = attributes.atime().and_then(|atime| atime.try_into().ok());
    attrs.mtime = attributes.mtime().and_then(|mtime| mtime.try_into().ok());
    attrs
}

impl SftpEngine for RusshSftp {
    fn last_error(&self) -> Option<Error> {
        self.last_error.clone()
    }

    fn open(&mut self, path: &str, flags: OpenFlags, permissions: u32, kind: OpenKind) -> Option<RemoteHandle> {
        self.last_error = None;
        let opened = match kind {
            OpenKind::File => {
                let wire_flags = WireOpenFlags::from_bits_truncate(flags.bits());
                let attributes = RemoteAttributes::new().with_permissions(permissions);
                self.rt.block_on(self.raw.open(path, wire_flags, to_wire(&attributes)))
            }
            OpenKind::Dir => self.rt.block_on(self.raw.opendir(path)),
        };
        let handle = match opened {
            Ok(handle) => handle.handle,
            Err(err) => {
                self.record(err);
                return None;
            }
        };

        let raw = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(
            raw,
            OpenRemote {
                handle,
                cursor: 0,
                batch: VecDeque::new(),
                exhausted: false,
            },
        );
        Some(RemoteHandle::new(raw))
    }

    fn close(&mut self, handle: RemoteHandle) -> Result<()> {
        self.last_error = None;
        let remote = match self.handles.remove(&handle.raw()) {
            Some(remote) => remote,
            None => return Err(self.invalid_handle()),
        };
        match self.rt.block_on(self.raw.close(remote.handle)) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.record(err)),
        }
    }

    fn read(&mut self, handle: RemoteHandle, buf: &mut [u8]) -> Result<usize> {
        self.last_error = None;
        let rt = self.rt.clone();
        let (remote_handle, cursor) = {
            let remote = self.remote(handle)?;
            (remote.handle.clone(), remote.cursor)
        };
        let len = buf.len().min(MAX_CHUNK) as u32;
        let data = match rt.block_on(self.raw.read(remote_handle, cursor, len)) {
            Ok(data) => data.data,
            Err(err) if is_eof(&err) => return Ok(0),
            Err(err) => return Err(self.record(err)),
        };
        let read = data.len().min(buf.len());
        buf[..read].copy_from_slice(&data[..read]);
        self.remote(handle)?.cursor += read as u64;
        Ok(read)
    }

    fn write(&mut self, handle: RemoteHandle, buf: &[u8]) -> Result<usize> {
        self.last_error = None;
        let rt = self.rt.clone();
        let (remote_handle, cursor) = {
            let remote = self.remote(handle)?;
            (remote.handle.clone(), remote.cursor)
        };
        let chunk = buf.len().min(MAX_CHUNK);
        if let Err(err) = rt.block_on(self.raw.write(remote_handle, cursor, buf[..chunk].to_vec())) {
            return Err(self.record(err));
        }
        self.remote(handle)?.cursor += chunk as u64;
        Ok(chunk)
    }

    fn seek(&mut self, handle: RemoteHandle, offset: u64) {
        if let Some(remote) = self.handles.get_mut(&handle.raw()) {
            remote.cursor = offset;
        }
    }

    fn tell(&self, handle: RemoteHandle) -> u64 {
        self.handles
            .get(&handle.raw())
            .map(|remote| remote.cursor)
            .unwrap_or_default()
    }

    fn fstat(&mut self, handle: RemoteHandle) -> Result<RemoteAttributes> {
        self.last_error = None;
        let remote_handle = self.remote(handle)?.handle.clone();
        match self.rt.block_on(self.raw.fstat(remote_handle)) {
            Ok(attrs) => Ok(from_wire(&attrs.attrs)),
            Err(err) => Err(self.record(err)),
        }
    }

    fn readdir(&mut self, handle: RemoteHandle, name: &mut [u8]) -> Result<Option<(usize, RemoteAttributes)>> {
        self.last_error = None;
        let rt = self.rt.clone();
        let remote = self.remote(handle)?;
        if remote.batch.is_empty() && !remote.exhausted {
            let remote_handle = remote.handle.clone();
            match rt.block_on(self.raw.readdir(remote_handle)) {
                Ok(names) => self.remote(handle)?.batch.extend(names.files),
                Err(err) if is_eof(&err) => self.remote(handle)?.exhausted = true,
                Err(err) => return Err(self.record(err)),
            }
        }

        let entry = match self.remote(handle)?.batch.pop_front() {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let bytes = entry.filename.as_bytes();
        if bytes.len() > name.len() {
            return Err(Error::Transport(TransportCode::BufferTooSmall));
        }
        name[..bytes.len()].copy_from_slice(bytes);
        Ok(Some((bytes.len(), from_wire(&entry.attrs))))
    }

    fn stat(&mut self, path: &str, kind: StatKind) -> Result<RemoteAttributes> {
        self.last_error = None;
        let stat = match kind {
            StatKind::Follow => self.rt.block_on(self.raw.stat(path)),
            StatKind::NoFollow => self.rt.block_on(self.raw.lstat(path)),
        };
        match stat {
            Ok(attrs) => Ok(from_wire(&attrs.attrs)),
            Err(err) => Err(self.record(err)),
        }
    }

    fn setstat(&mut self, path: &str, attributes: &RemoteAttributes) -> Result<()> {
        self.last_error = None;
        match self.rt.block_on(self.raw.setstat(path, to_wire(attributes))) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.record(err)),
        }
    }

    fn mkdir(&mut self, path: &str, permissions: u32) -> Result<()> {
        self.last_error = None;
        let attributes = RemoteAttributes::new().with_permissions(permissions);
        match self.rt.block_on(self.raw.mkdir(path, to_wire(&attributes))) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.record(err)),
        }
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        self.last_error = None;
        match self.rt.block_on(self.raw.rmdir(path)) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.record(err)),
        }
    }

    fn unlink(&mut self, path: &str) -> Result<()> {
        self.last_error = None;
        match self.rt.block_on(self.raw.remove(path)) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.record(err)),
        }
    }

    /// Version 3 servers refuse to rename onto an existing file. With
    /// `OVERWRITE`, and only when the refusal is of that kind, the existing
    /// non-directory target is removed and the rename retried once.
    fn rename(&mut self, old_path: &str, new_path: &str, flags: RenameFlags) -> Result<()> {
        self.last_error = None;
        let first = match self.rt.block_on(self.raw.rename(old_path, new_path)) {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };
        if !flags.contains(RenameFlags::OVERWRITE) || !refused_for_existing_target(status_of(&first)) {
            return Err(self.record(first));
        }

        let source_exists = self.rt.block_on(self.raw.lstat(old_path)).is_ok();
        let target_is_file = match self.rt.block_on(self.raw.lstat(new_path)) {
            Ok(attrs) => !from_wire(&attrs.attrs).permissions().is_some_and(is_dir_mode),
            Err(_) => false,
        };
        if !source_exists || !target_is_file {
            return Err(self.record(first));
        }

        debug!("Replacing {} with {}", new_path, old_path);
        if let Err(err) = self.rt.block_on(self.raw.remove(new_path)) {
            return Err(self.record(err));
        }
        match self.rt.block_on(self.raw.rename(old_path, new_path)) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.record(err)),
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        let handles: Vec<String> = self.handles.drain().map(|(_, remote)| remote.handle).collect();
        for handle in handles {
            if let Err(err) = self.rt.block_on(self.raw.close(handle)) {
                debug!("Failed to close a handle at shutdown: {}", err);
            }
        }
        Ok(())
    }
}

fn status_of(err: &SftpError) -> Option<SftpCode> {
    match err {
        SftpError::Status(status) => SftpCode::from_raw(status.status_code.clone() as u32),
        _ => None,
    }
}

/// Whether a failed rename may be retried after removing the target. Any other
/// status would fail the retry too, after the target is already gone.
fn refused_for_existing_target(status: Option<SftpCode>) -> bool {
    matches!(status, Some(SftpCode::Failure) | Some(SftpCode::FileAlreadyExists))
}

fn is_dir_mode(permissions: u32) -> bool {
    permissions & mode::S_IFMT == mode::S_IFDIR
}
