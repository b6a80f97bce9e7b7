use std::collections::{HashMap, VecDeque};

use crate::{
    engine::{OpenKind, RemoteHandle, SftpEngine, StatKind},
    error::{Error, Result, SftpCode, TransportCode},
    filesystem::{mode, OpenFlags, RemoteAttributes, RenameFlags},
};

use super::{normalize, parent_of, take_fault, MemoryServer, Node, ServerState};

const MAX_LINK_DEPTH: usize = 8;

/// SFTP channel of a [`MemoryEngine`](super::MemoryEngine).
///
/// Rejections are reported the way a libssh2 channel reports them: the call
/// fails with `SftpProtocol` and the status is left in `last_error`.
pub struct MemorySftp {
    server: MemoryServer,
    last_error: Option<Error>,
    handles: HashMap<u64, OpenHandle>,
    next_handle: u64,
}

struct OpenHandle {
    path: String,
    flags: OpenFlags,
    cursor: u64,
    listing: VecDeque<(String, RemoteAttributes)>,
}

impl MemorySftp {
    pub(crate) fn new(server: MemoryServer) -> MemorySftp {
        MemorySftp {
            server,
            last_error: None,
            handles: HashMap::new(),
            next_handle: 1,
        }
    }

    fn status(&mut self, code: SftpCode) -> Error {
        self.last_error = Some(Error::Filesystem(code));
        Error::Transport(TransportCode::SftpProtocol)
    }

    fn register(&mut self, path: String, flags: OpenFlags, cursor: u64, listing: VecDeque<(String, RemoteAttributes)>) -> RemoteHandle {
        let raw = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(
            raw,
            OpenHandle {
                path,
                flags,
                cursor,
                listing,
            },
        );
        self.server.state().open_handles += 1;
        RemoteHandle::new(raw)
    }

    fn open_file(&mut self, path: String, flags: OpenFlags, permissions: u32) -> std::result::Result<RemoteHandle, SftpCode> {
        let cursor = {
            let mut state = self.server.state();
            match state.nodes.get_mut(&path) {
                Some(node) if node.is_dir() => return Err(SftpCode::Failure),
                Some(_) if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) => {
                    return Err(SftpCode::FileAlreadyExists)
                }
                Some(node) => {
                    if flags.contains(OpenFlags::TRUNCATE) {
                        node.set_data_len(0);
                    }
                    0
                }
                None if flags.contains(OpenFlags::CREATE) => {
                    parent_dir(&state, &path)?;
                    state.nodes.insert(path.clone(), Node::new(mode::S_IFREG, permissions));
                    0
                }
                None => return Err(SftpCode::NoSuchFile),
            }
        };
        Ok(self.register(path, flags, cursor, VecDeque::new()))
    }

    fn open_dir(&mut self, path: String) -> std::result::Result<RemoteHandle, SftpCode> {
        let listing = {
            let state = self.server.state();
            let dir = state.nodes.get(&path).ok_or(SftpCode::NoSuchFile)?;
            if !dir.is_dir() {
                return Err(SftpCode::NotADirectory);
            }
            let parent = parent_of(&path)
                .and_then(|parent| state.nodes.get(parent))
                .unwrap_or(dir);

            let mut listing = VecDeque::new();
            listing.push_back((".".to_string(), dir.attributes));
            listing.push_back(("..".to_string(), parent.attributes));
            for (child, node) in state.nodes.iter() {
                if child != &path && parent_of(child) == Some(path.as_str()) {
                    let name = child.rsplit('/').next().unwrap_or_default();
                    listing.push_back((name.to_string(), node.attributes));
                }
            }
            listing
        };
        Ok(self.register(path, OpenFlags::empty(), 0, listing))
    }

    fn handle_path(&mut self, handle: RemoteHandle) -> Result<String> {
        match self.handles.get(&handle.raw()) {
            Some(open) => Ok(open.path.clone()),
            None => Err(self.status(SftpCode::InvalidHandle)),
        }
    }

    fn resolve(&self, path: &str, kind: StatKind) -> std::result::Result<String, SftpCode> {
        let state = self.server.state();
        let mut current = normalize(path);
        for _ in 0..MAX_LINK_DEPTH {
            let node = state.nodes.get(&current).ok_or(SftpCode::NoSuchFile)?;
            match (&node.target, kind) {
                (Some(target), StatKind::Follow) => current = target.clone(),
                _ => return Ok(current),
            }
        }
        Err(SftpCode::LinkLoop)
    }

    fn path_op<F>(&mut self, operation: F) -> Result<()>
    where
        F: FnOnce(&mut ServerState) -> std::result::Result<(), SftpCode>,
    {
        self.last_error = None;
        let result = operation(&mut *self.server.state());
        result.map_err(|code| self.status(code))
    }
}

fn parent_dir(state: &ServerState, path: &str) -> std::result::Result<(), SftpCode> {
    let parent = parent_of(path).ok_or(SftpCode::Failure)?;
    match state.nodes.get(parent) {
        Some(node) if node.is_dir() => Ok(()),
        Some(_) => Err(SftpCode::NotADirectory),
        None => Err(SftpCode::NoSuchFile),
    }
}

fn has_children(state: &ServerState, path: &str) -> bool {
    state
        .nodes
        .keys()
        .any(|child| child != path && parent_of(child) == Some(path))
}

impl SftpEngine for MemorySftp {
    fn last_error(&self) -> Option<Error> {
        self.last_error.clone()
    }

    fn open(&mut self, path: &str, flags: OpenFlags, permissions: u32, kind: OpenKind) -> Option<RemoteHandle> {
        self.last_error = None;
        let path = normalize(path);
        let injected = self.server.state().failing_opens.get(&path).cloned();
        if let Some(session_error) = injected {
            self.server.state().session_error = session_error;
            return None;
        }

        let opened = match kind {
            OpenKind::File => self.open_file(path, flags, permissions),
            OpenKind::Dir => self.open_dir(path),
        };
        match opened {
            Ok(handle) => Some(handle),
            Err(code) => {
                self.status(code);
                None
            }
        }
    }

    fn close(&mut self, handle: RemoteHandle) -> Result<()> {
        self.last_error = None;
        match self.handles.remove(&handle.raw()) {
            Some(_) => {
                self.server.state().open_handles -= 1;
                Ok(())
            }
            None => Err(self.status(SftpCode::InvalidHandle)),
        }
    }

    fn read(&mut self, handle: RemoteHandle, buf: &mut [u8]) -> Result<usize> {
        self.last_error = None;
        let (path, flags, cursor) = match self.handles.get(&handle.raw()) {
            Some(open) => (open.path.clone(), open.flags, open.cursor),
            None => return Err(self.status(SftpCode::InvalidHandle)),
        };
        if !flags.contains(OpenFlags::READ) {
            return Err(self.status(SftpCode::PermissionDenied));
        }
        let read = {
            let state = self.server.state();
            match state.nodes.get(&path) {
                Some(node) => {
                    let start = (cursor as usize).min(node.data.len());
                    let read = buf.len().min(node.data.len() - start);
                    buf[..read].copy_from_slice(&node.data[start..start + read]);
                    Some(read)
                }
                None => None,
            }
        };
        let read = match read {
            Some(read) => read,
            None => return Err(self.status(SftpCode::NoSuchFile)),
        };
        if let Some(open) = self.handles.get_mut(&handle.raw()) {
            open.cursor += read as u64;
        }
        Ok(read)
    }

    fn write(&mut self, handle: RemoteHandle, buf: &[u8]) -> Result<usize> {
        self.last_error = None;
        let (path, flags, cursor) = match self.handles.get(&handle.raw()) {
            Some(open) => (open.path.clone(), open.flags, open.cursor),
            None => return Err(self.status(SftpCode::InvalidHandle)),
        };
        if !flags.contains(OpenFlags::WRITE) {
            return Err(self.status(SftpCode::PermissionDenied));
        }
        let fault = take_fault(&mut self.server.state().failing_write);
        if let Some(code) = fault {
            return Err(self.status(code));
        }
        let end = {
            let mut state = self.server.state();
            let chunk = state.write_chunk.unwrap_or(usize::MAX).min(buf.len());
            match state.nodes.get_mut(&path) {
                Some(node) => {
                    let start = match flags.contains(OpenFlags::APPEND) {
                        true => node.data.len(),
                        false => cursor as usize,
                    };
                    if node.data.len() < start + chunk {
                        node.set_data_len(start + chunk);
                    }
                    node.data[start..start + chunk].copy_from_slice(&buf[..chunk]);
                    Some((start + chunk, chunk))
                }
                None => None,
            }
        };
        let (end, written) = match end {
            Some(end) => end,
            None => return Err(self.status(SftpCode::NoSuchFile)),
        };
        if let Some(open) = self.handles.get_mut(&handle.raw()) {
            open.cursor = end as u64;
        }
        Ok(written)
    }

    fn seek(&mut self, handle: RemoteHandle, offset: u64) {
        if let Some(open) = self.handles.get_mut(&handle.raw()) {
            open.cursor = offset;
        }
    }

    fn tell(&self, handle: RemoteHandle) -> u64 {
        self.handles
            .get(&handle.raw())
            .map(|open| open.cursor)
            .unwrap_or_default()
    }

    fn fstat(&mut self, handle: RemoteHandle) -> Result<RemoteAttributes> {
        self.last_error = None;
        let path = self.handle_path(handle)?;
        let attributes = self.server.state().nodes.get(&path).map(|node| node.attributes);
        attributes.ok_or_else(|| self.status(SftpCode::NoSuchFile))
    }

    fn readdir(&mut self, handle: RemoteHandle, name: &mut [u8]) -> Result<Option<(usize, RemoteAttributes)>> {
        self.last_error = None;
        let fault = take_fault(&mut self.server.state().failing_readdir);
        if let Some(code) = fault {
            return Err(self.status(code));
        }
        let entry = match self.handles.get_mut(&handle.raw()) {
            Some(open) => open.listing.pop_front(),
            None => return Err(self.status(SftpCode::InvalidHandle)),
        };
        let (entry, attributes) = match entry {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let bytes = entry.as_bytes();
        if bytes.len() > name.len() {
            return Err(Error::Transport(TransportCode::BufferTooSmall));
        }
        name[..bytes.len()].copy_from_slice(bytes);
        Ok(Some((bytes.len(), attributes)))
    }

    fn stat(&mut self, path: &str, kind: StatKind) -> Result<RemoteAttributes> {
        self.last_error = None;
        let resolved = match self.resolve(path, kind) {
            Ok(resolved) => resolved,
            Err(code) => return Err(self.status(code)),
        };
        let attributes = self.server.state().nodes.get(&resolved).map(|node| node.attributes);
        attributes.ok_or_else(|| self.status(SftpCode::NoSuchFile))
    }

    fn setstat(&mut self, path: &str, attributes: &RemoteAttributes) -> Result<()> {
        let path = normalize(path);
        self.path_op(|state| {
            let node = state.nodes.get_mut(&path).ok_or(SftpCode::NoSuchFile)?;
            let type_bits = node.type_bits();
            node.attributes.apply(attributes);
            if let Some(permissions) = attributes.permissions() {
                node.attributes = node
                    .attributes
                    .with_permissions(type_bits | (permissions & !mode::S_IFMT));
            }
            if let Some(size) = attributes.size() {
                node.set_data_len(size as usize);
            }
            Ok(())
        })
    }

    fn mkdir(&mut self, path: &str, permissions: u32) -> Result<()> {
        let path = normalize(path);
        self.path_op(|state| {
            if state.nodes.contains_key(&path) {
                return Err(SftpCode::FileAlreadyExists);
            }
            parent_dir(state, &path)?;
            state.nodes.insert(path, Node::new(mode::S_IFDIR, permissions));
            Ok(())
        })
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        let path = normalize(path);
        self.path_op(|state| {
            let node = state.nodes.get(&path).ok_or(SftpCode::NoSuchFile)?;
            if !node.is_dir() {
                return Err(SftpCode::NotADirectory);
            }
            if path == "/" {
                return Err(SftpCode::PermissionDenied);
            }
            if has_children(state, &path) {
                return Err(SftpCode::DirNotEmpty);
            }
            state.nodes.remove(&path);
            Ok(())
        })
    }

    fn unlink(&mut self, path: &str) -> Result<()> {
        let path = normalize(path);
        self.path_op(|state| {
            let node = state.nodes.get(&path).ok_or(SftpCode::NoSuchFile)?;
            if node.is_dir() {
                return Err(SftpCode::Failure);
            }
            state.nodes.remove(&path);
            Ok(())
        })
    }

    fn rename(&mut self, old_path: &str, new_path: &str, flags: RenameFlags) -> Result<()> {
        let old_path = normalize(old_path);
        let new_path = normalize(new_path);
        self.path_op(|state| {
            let source_is_dir = state.nodes.get(&old_path).ok_or(SftpCode::NoSuchFile)?.is_dir();
            if old_path == new_path {
                return Ok(());
            }
            if let Some(existing) = state.nodes.get(&new_path) {
                if !flags.contains(RenameFlags::OVERWRITE) {
                    return Err(SftpCode::FileAlreadyExists);
                }
                if existing.is_dir() != source_is_dir || has_children(state, &new_path) {
                    return Err(SftpCode::Failure);
                }
            }
            parent_dir(state, &new_path)?;

            let prefix = format!("{}/", old_path);
            let moved: Vec<String> = state
                .nodes
                .keys()
                .filter(|key| **key == old_path || key.starts_with(&prefix))
                .cloned()
                .collect();
            for key in moved {
                if let Some(node) = state.nodes.remove(&key) {
                    let renamed = format!("{}{}", new_path, &key[old_path.len()..]);
                    state.nodes.insert(renamed, node);
                }
            }
            Ok(())
        })
    }

    fn shutdown(&mut self) -> Result<()> {
        let mut state = self.server.state();
        state.open_handles -= self.handles.len();
        state.sftp_shutdowns += 1;
        self.handles.clear();
        Ok(())
    }
}
