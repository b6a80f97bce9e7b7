use std::path::Path;

use crate::{
    engine::{AgentEngine, AgentIdentity},
    error::{Error, Result, TransportCode},
};

use super::MemoryServer;

/// Agent of a [`MemoryServer`], serving the identities registered on it.
pub struct MemoryAgent {
    server: MemoryServer,
    connected: bool,
    listed: Option<Vec<std::result::Result<AgentIdentity, Error>>>,
}

impl MemoryAgent {
    pub(crate) fn new(server: MemoryServer) -> MemoryAgent {
        MemoryAgent {
            server,
            connected: false,
            listed: None,
        }
    }
}

impl AgentEngine for MemoryAgent {
    fn connect(&mut self, path: Option<&Path>) -> Result<()> {
        let mut state = self.server.state();
        state.agent_paths.push(path.map(Path::to_path_buf));
        if !state.agent_available {
            return Err(Error::Transport(TransportCode::AgentProtocol));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn list_identities(&mut self) -> Result<()> {
        if !self.connected {
            return Err(Error::Transport(TransportCode::BadUse));
        }
        self.listed = Some(self.server.state().identities.clone());
        Ok(())
    }

    fn identity(&mut self, index: usize) -> Result<Option<AgentIdentity>> {
        let listed = self
            .listed
            .as_ref()
            .ok_or(Error::Transport(TransportCode::BadUse))?;
        match listed.get(index) {
            Some(Ok(identity)) => Ok(Some(identity.clone())),
            Some(Err(err)) => Err(err.clone()),
            None => Ok(None),
        }
    }

    fn free(&mut self) {
        self.listed = None;
        self.server.state().agents_freed += 1;
    }
}
