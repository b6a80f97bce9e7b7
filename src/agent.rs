use std::{cell::RefCell, marker::PhantomData, path::Path};

use tracing::{debug, warn};

use crate::{
    engine::{AgentEngine, TransportEngine},
    error::{Error, Result, TransportCode},
    session::Session,
};

/// Connection to a local identity agent, bound to the session it authenticates.
pub struct Agent<'s, E>
where
    E: TransportEngine,
{
    session: &'s Session<E>,
    inner: RefCell<E::Agent>,
    connected: bool,
}

/// Public key credential held by the agent.
///
/// Borrowed from the [`Agent`] that listed it; it stays usable for as many
/// [`Agent::authenticate`] calls as needed, but not past the agent itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity<'a> {
    index: usize,
    blob: Vec<u8>,
    comment: String,
    _agent: PhantomData<&'a ()>,
}

impl Identity<'_> {
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }
}

/// Lazy walk over the agent's identities.
///
/// Ends at the agent's end-of-list answer. A slot that fails to load is
/// yielded as an `Err` and the walk moves on to the next one.
pub struct Identities<'a, 's, E>
where
    E: TransportEngine,
{
    agent: &'a Agent<'s, E>,
    next: usize,
    done: bool,
}

impl<'s, E> Agent<'s, E>
where
    E: TransportEngine,
{
    pub(crate) fn init(session: &'s Session<E>) -> Result<Agent<'s, E>> {
        let inner = session
            .engine
            .borrow_mut()
            .agent_init()
            .map_err(|_| Error::Transport(TransportCode::Alloc))?;
        Ok(Agent {
            session,
            inner: RefCell::new(inner),
            connected: false,
        })
    }

    /// Connects to the agent at `path`, else the configured socket, else `$SSH_AUTH_SOCK`.
    pub fn connect(&mut self, path: Option<&Path>) -> Result<()> {
        let resolved = match path {
            Some(path) => Some(path.to_path_buf()),
            None => self.session.config.resolve_agent_socket(),
        };
        debug!("Connecting to identity agent at {:?}", resolved);
        self.inner.get_mut().connect(resolved.as_deref())?;
        self.connected = true;
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.inner.get_mut().disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Fetches the agent's identity list and returns a lazy walk over it.
    pub fn list_identities(&self) -> Result<Identities<'_, 's, E>> {
        if !self.connected {
            return Err(Error::Transport(TransportCode::BadUse));
        }
        self.inner.borrow_mut().list_identities()?;
        Ok(Identities {
            agent: self,
            next: 0,
            done: false,
        })
    }

    /// Public key authentication of `username` with one listed identity.
    pub fn authenticate(&self, username: &str, identity: &Identity<'_>) -> Result<()> {
        if !self.connected {
            return Err(Error::Transport(TransportCode::BadUse));
        }
        self.session.require_handshake()?;
        self.session.retry_blocked(|engine| {
            engine.authenticate_with_identity(&mut *self.inner.borrow_mut(), username, identity.index)
        })?;
        self.session.mark_authenticated(username);
        Ok(())
    }
}

impl<E> Drop for Agent<'_, E>
where
    E: TransportEngine,
{
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            warn!("Failed to disconnect from identity agent: {}", err);
        }
        self.inner.get_mut().free();
    }
}

impl<'a, 's, E> Iterator for Identities<'a, 's, E>
where
    E: TransportEngine,
{
    type Item = Result<Identity<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let index = self.next;
        self.next += 1;

        match self.agent.inner.borrow_mut().identity(index) {
            Ok(Some(identity)) => Some(Ok(Identity {
                index,
                blob: identity.blob,
                comment: identity.comment,
                _agent: PhantomData,
            })),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => Some(Err(err)),
        }
    }
}
