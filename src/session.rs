use std::{
    cell::{Cell, RefCell},
    net::TcpStream,
    thread,
};

use tracing::{debug, info, warn};

use crate::{
    agent::Agent,
    config::SessionConfig,
    engine::TransportEngine,
    error::{Error, Result, TransportCode},
    hostkey::{HashType, HostKeyDigest},
    sftp::SftpSession,
};

/// SSH_DISCONNECT_* reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectCode {
    HostNotAllowedToConnect = 1,
    ProtocolError = 2,
    KeyExchangeFailed = 3,
    Reserved = 4,
    MacError = 5,
    CompressionError = 6,
    ServiceNotAvailable = 7,
    ProtocolVersionNotSupported = 8,
    HostKeyNotVerifiable = 9,
    ConnectionLost = 10,
    ByApplication = 11,
    TooManyConnections = 12,
    AuthCancelledByUser = 13,
    NoMoreAuthMethodsAvailable = 14,
    IllegalUserName = 15,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    HandshakeDone,
    Authenticated,
    Closed,
}

/// One authenticated (or authenticating) transport connection.
///
/// Every operation blocks until it completes. The engine sits in a
/// `RefCell`, so a `Session` can't be shared between threads; open one
/// session per connection instead.
pub struct Session<E>
where
    E: TransportEngine,
{
    pub(crate) engine: RefCell<E>,
    pub(crate) config: SessionConfig,
    state: Cell<SessionState>,
}

impl<E> Session<E>
where
    E: TransportEngine,
{
    pub fn new(engine: E, config: SessionConfig) -> Session<E> {
        Session {
            engine: RefCell::new(engine),
            config,
            state: Cell::new(SessionState::Created),
        }
    }

    /// Allocates a fresh engine context; any failure there is `Transport(Alloc)`.
    pub fn init(config: SessionConfig) -> Result<Session<E>> {
        let engine = E::init().map_err(|err| {
            warn!("Failed to allocate transport context: {}", err);
            Error::Transport(TransportCode::Alloc)
        })?;
        Ok(Session::new(engine, config))
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.get() == SessionState::Authenticated
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Performs the transport handshake over `socket`, which must already be connected.
    pub fn handshake(&mut self, socket: TcpStream) -> Result<()> {
        if self.state.get() != SessionState::Created {
            return Err(Error::Transport(TransportCode::BadUse));
        }
        let peer = socket
            .peer_addr()
            .map_err(|_| Error::Transport(TransportCode::BadSocket))?;
        socket
            .set_nonblocking(false)
            .map_err(|_| Error::Transport(TransportCode::BadSocket))?;

        debug!("Starting handshake with {}", peer);
        self.engine.get_mut().handshake(socket)?;
        self.state.set(SessionState::HandshakeDone);
        info!("Handshake with {} complete", peer);
        Ok(())
    }

    pub fn host_key_digest(&self, hash_type: HashType) -> Result<HostKeyDigest> {
        self.require_handshake()?;
        self.engine.borrow().host_key_digest(hash_type)
    }

    /// Method names the server accepts for `username`, e.g. `password`, `publickey`.
    pub fn list_auth_methods(&self, username: &str) -> Result<Vec<String>> {
        self.require_handshake()?;
        let methods = self.retry_blocked(|engine| engine.list_auth_methods(username))?;
        Ok(methods
            .split(',')
            .map(str::trim)
            .filter(|method| !method.is_empty())
            .map(String::from)
            .collect())
    }

    /// Password authentication. Would-block answers are retried a bounded
    /// number of times and then surface as [`Error::Blocked`].
    pub fn authenticate_with_password(&self, username: &str, password: &str) -> Result<()> {
        self.require_handshake()?;
        self.retry_blocked(|engine| engine.authenticate_with_password(username, password))?;
        self.mark_authenticated(username);
        Ok(())
    }

    /// Sends a by-application disconnect with `reason`. Best effort.
    pub fn disconnect(&self, reason: &str) -> Result<()> {
        self.require_handshake()?;
        let result = self
            .engine
            .borrow_mut()
            .disconnect(DisconnectCode::ByApplication, reason, "");
        if let Err(err) = &result {
            warn!("Disconnect notification failed: {}", err);
        }
        result
    }

    pub fn last_error(&self) -> Option<Error> {
        self.engine.borrow().last_error()
    }

    /// Opens the file transfer channel. Requires a completed authentication.
    pub fn sftp(&self) -> Result<SftpSession<'_, E>> {
        SftpSession::init(self)
    }

    pub fn agent(&self) -> Result<Agent<'_, E>> {
        Agent::init(self)
    }

    /// Releases the transport context.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    pub(crate) fn mark_authenticated(&self, username: &str) {
        self.state.set(SessionState::Authenticated);
        info!("User {} authenticated", username);
    }

    pub(crate) fn require_handshake(&self) -> Result<()> {
        match self.state.get() {
            SessionState::HandshakeDone | SessionState::Authenticated => Ok(()),
            _ => Err(Error::Transport(TransportCode::BadUse)),
        }
    }

    pub(crate) fn retry_blocked<T, F>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(&mut E) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            let result = operation(&mut *self.engine.borrow_mut());
            match result {
                Err(Error::Blocked) if attempt < self.config.blocked_retries => {
                    attempt += 1;
                    debug!("Operation would block, retry {}", attempt);
                    thread::sleep(self.config.blocked_backoff);
                }
                result => return result,
            }
        }
    }

    fn release(&mut self) -> Result<()> {
        if self.state.get() == SessionState::Closed {
            return Ok(());
        }
        self.state.set(SessionState::Closed);
        debug!("Releasing transport context");
        self.engine.get_mut().free()
    }
}

impl<E> Drop for Session<E>
where
    E: TransportEngine,
{
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("Failed to release transport context: {}", err);
        }
    }
}
