use std::cell::{Cell, RefCell};

use tracing::{debug, info, warn};

use crate::{
    engine::{OpenKind, RemoteHandle, SftpEngine, StatKind, TransportEngine},
    error::{resolve, Error, Result, SftpCode, TransportCode},
    filesystem::{base_name, mode::PERMISSION_MASK, Metadata, OpenFlags, RemoteAttributes, RenameFlags},
    handle::{Dir, File},
    session::Session,
};

/// File transfer channel opened on an authenticated [`Session`].
pub struct SftpSession<'s, E>
where
    E: TransportEngine,
{
    session: &'s Session<E>,
    pub(crate) channel: RefCell<E::Sftp>,
    active: Cell<bool>,
}

impl<'s, E> SftpSession<'s, E>
where
    E: TransportEngine,
{
    pub(crate) fn init(session: &'s Session<E>) -> Result<SftpSession<'s, E>> {
        if !session.is_authenticated() {
            return Err(Error::Transport(TransportCode::BadUse));
        }
        let result = session.engine.borrow_mut().sftp_init();
        let channel = result.map_err(|err| {
            resolve(None, session.last_error().or(Some(err)), || {
                "failed to initialize sftp session".into()
            })
        })?;
        info!("SFTP session started");

        Ok(SftpSession {
            session,
            channel: RefCell::new(channel),
            active: Cell::new(true),
        })
    }

    pub fn session(&self) -> &'s Session<E> {
        self.session
    }

    /// Status of the channel's most recent failed call.
    pub fn last_error(&self) -> Option<Error> {
        self.channel.borrow().last_error()
    }

    pub fn open_file(&self, path: &str, flags: impl Into<OpenFlags>, mode: u32) -> Result<File<'_, E>> {
        let handle = self.open(path, flags.into(), mode, OpenKind::File)?;
        Ok(File::new(self, handle))
    }

    pub fn open_dir(&self, path: &str, flags: impl Into<OpenFlags>, mode: u32) -> Result<Dir<'_, E>> {
        let handle = self.open(path, flags.into(), mode, OpenKind::Dir)?;
        Ok(Dir::new(self, handle))
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let result = self.channel.borrow_mut().mkdir(path, mode);
        result.map_err(|err| self.settle(err))
    }

    /// Creates `path` and every missing parent. Succeeds if `path` already is a directory.
    pub fn mkdir_all(&self, path: &str, perm: u32) -> Result<()> {
        if let Ok(metadata) = self.stat(path) {
            if metadata.is_dir() {
                return Ok(());
            }
            return Err(Error::Filesystem(SftpCode::NotADirectory));
        }

        let bytes = path.as_bytes();
        let mut i = bytes.len();
        while i > 0 && bytes[i - 1] == b'/' {
            i -= 1;
        }
        while i > 0 && bytes[i - 1] != b'/' {
            i -= 1;
        }
        let parent = &path[..i.saturating_sub(1)];
        if !parent.is_empty() {
            self.mkdir_all(parent, perm)?;
        }

        match self.mkdir(path, perm) {
            Ok(()) => Ok(()),
            Err(err) => {
                // covers "foo/." and a concurrent creator
                match self.lstat(path) {
                    Ok(metadata) if metadata.is_dir() => Ok(()),
                    _ => Err(err),
                }
            }
        }
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        let result = self.channel.borrow_mut().rmdir(path);
        result.map_err(|err| self.settle(err))
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        let result = self.channel.borrow_mut().unlink(path);
        result.map_err(|err| self.settle(err))
    }

    /// Renames with overwrite, atomic and native semantics requested.
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let flags = RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE;
        let result = self.channel.borrow_mut().rename(old_path, new_path, flags);
        result.map_err(|err| self.settle(err))
    }

    pub fn stat(&self, path: &str) -> Result<Metadata> {
        self.stat_kind(path, StatKind::Follow)
    }

    /// Like [`SftpSession::stat`] but describes a symlink itself.
    pub fn lstat(&self, path: &str) -> Result<Metadata> {
        self.stat_kind(path, StatKind::NoFollow)
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.setstat(path, RemoteAttributes::new().with_owner(uid, gid))
    }

    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.setstat(path, RemoteAttributes::new().with_permissions(mode & PERMISSION_MASK))
    }

    pub fn set_times(&self, path: &str, atime: u64, mtime: u64) -> Result<()> {
        self.setstat(path, RemoteAttributes::new().with_times(atime, mtime))
    }

    /// Lists `path` without its `.` and `..` entries, in server order.
    pub fn read_dir(&self, path: &str) -> Result<Vec<Metadata>> {
        let mut dir = self.open_dir(path, OpenFlags::empty(), 0)?;
        let mut entries = Vec::new();
        let listed = loop {
            match dir.next_entry() {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break Ok(()),
                Err(Error::Transport(TransportCode::BufferTooSmall)) => {
                    warn!(
                        "Skipping an entry of {} longer than {} bytes",
                        path,
                        self.session.config.name_buffer_len
                    );
                }
                Err(err) => break Err(err),
            }
        };
        let closed = dir.close();
        listed?;
        closed?;
        debug!("Listed {} entries of {}", entries.len(), path);
        Ok(entries)
    }

    /// Closes the channel.
    pub fn shutdown(self) -> Result<()> {
        self.release()
    }

    pub(crate) fn name_buffer_len(&self) -> usize {
        self.session.config.name_buffer_len
    }

    /// Replaces a call's error with the channel status when there is one.
    pub(crate) fn settle(&self, err: Error) -> Error {
        resolve(self.last_error(), Some(err), String::new)
    }

    fn open(&self, path: &str, flags: OpenFlags, mode: u32, kind: OpenKind) -> Result<RemoteHandle> {
        let handle = self.channel.borrow_mut().open(path, flags, mode, kind);
        match handle {
            Some(handle) => {
                debug!("Opened {:?} {}", kind, path);
                Ok(handle)
            }
            // A transport failure leaves no sftp status behind, only the session's.
            None => Err(resolve(self.last_error(), self.session.last_error(), || match kind {
                OpenKind::File => format!("unable to open file {}, unknown error", path),
                OpenKind::Dir => format!("unable to open dir {}, unknown error", path),
            })),
        }
    }

    fn stat_kind(&self, path: &str, kind: StatKind) -> Result<Metadata> {
        let result = self.channel.borrow_mut().stat(path, kind);
        let attributes = result.map_err(|err| self.settle(err))?;
        Ok(Metadata::new(base_name(path), attributes))
    }

    fn setstat(&self, path: &str, attributes: RemoteAttributes) -> Result<()> {
        let result = self.channel.borrow_mut().setstat(path, &attributes);
        result.map_err(|err| self.settle(err))
    }

    fn release(&self) -> Result<()> {
        if !self.active.replace(false) {
            return Ok(());
        }
        debug!("Shutting down SFTP session");
        self.channel.borrow_mut().shutdown()
    }
}

impl<E> Drop for SftpSession<'_, E>
where
    E: TransportEngine,
{
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("Failed to shut down SFTP session: {}", err);
        }
    }
}
