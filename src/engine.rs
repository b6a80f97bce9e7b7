//! The capability set the facade drives.
//!
//! An engine owns the secure transport (handshake, key exchange, channel
//! framing) and the SFTP channel primitives. Engines report failures the
//! way the underlying library does: a path operation that the server
//! rejected fails with [`TransportCode::SftpProtocol`](crate::TransportCode)
//! and leaves the status in [`SftpEngine::last_error`], an open that failed
//! below the SFTP layer yields no handle and no status at all. The facade
//! turns all of that into one [`Error`](crate::Error) through
//! [`resolve`](crate::error::resolve).

use std::{net::TcpStream, path::Path};

use crate::{
    error::{Error, Result},
    filesystem::{OpenFlags, RemoteAttributes, RenameFlags},
    hostkey::{HashType, HostKeyDigest},
    session::DisconnectCode,
};

/// Opaque token into an engine's handle registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteHandle(u64);

impl RemoteHandle {
    pub fn new(raw: u64) -> RemoteHandle {
        RemoteHandle(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenKind {
    File,
    Dir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Follow,
    NoFollow,
}

/// One identity as reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub blob: Vec<u8>,
    pub comment: String,
}

pub trait TransportEngine {
    type Sftp: SftpEngine;
    type Agent: AgentEngine;

    /// Allocates a fresh, unconnected context.
    fn init() -> Result<Self>
    where
        Self: Sized;

    /// Runs the full handshake over an already connected socket, in blocking mode.
    fn handshake(&mut self, socket: TcpStream) -> Result<()>;

    fn disconnect(&mut self, code: DisconnectCode, description: &str, language: &str) -> Result<()>;

    /// Last transport error of this connection, `None` when clear.
    fn last_error(&self) -> Option<Error>;

    fn host_key_digest(&self, hash_type: HashType) -> Result<HostKeyDigest>;

    /// Comma separated method names the server advertises for `username`.
    fn list_auth_methods(&mut self, username: &str) -> Result<String>;

    fn authenticate_with_password(&mut self, username: &str, password: &str) -> Result<()>;

    fn authenticate_with_identity(
        &mut self,
        agent: &mut Self::Agent,
        username: &str,
        identity: usize,
    ) -> Result<()>;

    fn sftp_init(&mut self) -> Result<Self::Sftp>;

    fn agent_init(&mut self) -> Result<Self::Agent>;

    /// Releases the connection context. Called exactly once.
    fn free(&mut self) -> Result<()>;
}

pub trait AgentEngine {
    /// Connects to `path`, or to the engine's default socket when `None`.
    fn connect(&mut self, path: Option<&Path>) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    /// Asks the agent for its identities; slots are then read with [`AgentEngine::identity`].
    fn list_identities(&mut self) -> Result<()>;

    /// `Ok(None)` is the agent's end-of-list answer.
    fn identity(&mut self, index: usize) -> Result<Option<AgentIdentity>>;

    /// Releases everything the agent handed out. Called exactly once.
    fn free(&mut self);
}

pub trait SftpEngine {
    /// Status of the most recent failed call, `None` when it carried none.
    fn last_error(&self) -> Option<Error>;

    /// `None` when the open failed; the reason is in the last errors.
    fn open(&mut self, path: &str, flags: OpenFlags, mode: u32, kind: OpenKind) -> Option<RemoteHandle>;

    fn close(&mut self, handle: RemoteHandle) -> Result<()>;

    /// Reads at the handle's cursor. `Ok(0)` is end of file.
    fn read(&mut self, handle: RemoteHandle, buf: &mut [u8]) -> Result<usize>;

    /// Writes at the handle's cursor, possibly accepting less than `buf`.
    fn write(&mut self, handle: RemoteHandle, buf: &[u8]) -> Result<usize>;

    fn seek(&mut self, handle: RemoteHandle, offset: u64);

    fn tell(&self, handle: RemoteHandle) -> u64;

    fn fstat(&mut self, handle: RemoteHandle) -> Result<RemoteAttributes>;

    /// Copies the next entry name into `name`. `Ok(None)` ends the listing;
    /// a name longer than `name` fails with
    /// [`TransportCode::BufferTooSmall`](crate::TransportCode) and consumes the entry.
    fn readdir(&mut self, handle: RemoteHandle, name: &mut [u8]) -> Result<Option<(usize, RemoteAttributes)>>;

    fn stat(&mut self, path: &str, kind: StatKind) -> Result<RemoteAttributes>;

    /// Applies only the attributes whose presence flag is set.
    fn setstat(&mut self, path: &str, attributes: &RemoteAttributes) -> Result<()>;

    fn mkdir(&mut self, path: &str, mode: u32) -> Result<()>;

    fn rmdir(&mut self, path: &str) -> Result<()>;

    fn unlink(&mut self, path: &str) -> Result<()>;

    fn rename(&mut self, old_path: &str, new_path: &str, flags: RenameFlags) -> Result<()>;

    /// Closes the channel. Called exactly once.
    fn shutdown(&mut self) -> Result<()>;
}
