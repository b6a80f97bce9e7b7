use std::{path::Path, rc::Rc};

use russh_keys::{agent::client::AgentClient, key::PublicKey, PublicKeyBase64};
use tokio::{net::UnixStream, runtime::Runtime};

use crate::{
    engine::{AgentEngine, AgentIdentity},
    error::{Error, Result, TransportCode},
};

pub struct RusshAgent {
    rt: Rc<Runtime>,
    client: Option<AgentClient<UnixStream>>,
    listed: Option<Vec<PublicKey>>,
}

impl RusshAgent {
    pub(crate) fn new(rt: Rc<Runtime>) -> RusshAgent {
        RusshAgent {
            rt,
            client: None,
            listed: None,
        }
    }

    pub(crate) fn key(&self, index: usize) -> Option<PublicKey> {
        self.listed.as_ref().and_then(|keys| keys.get(index)).cloned()
    }

    /// The signer is moved into the authentication future and handed back afterwards.
    pub(crate) fn take_client(&mut self) -> Option<AgentClient<UnixStream>> {
        self.client.take()
    }

    pub(crate) fn restore_client(&mut self, client: AgentClient<UnixStream>) {
        self.client = Some(client);
    }
}

impl AgentEngine for RusshAgent {
    fn connect(&mut self, path: Option<&Path>) -> Result<()> {
        let connected = match path {
            Some(path) => self.rt.block_on(AgentClient::connect_uds(path)),
            None => self.rt.block_on(AgentClient::connect_env()),
        };
        match connected {
            Ok(client) => {
                self.client = Some(client);
                Ok(())
            }
            Err(_) => Err(Error::Transport(TransportCode::AgentProtocol)),
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }

    fn list_identities(&mut self) -> Result<()> {
        let client = self
            .client
            .as_mut()
            .ok_or(Error::Transport(TransportCode::BadUse))?;
        let keys = self
            .rt
            .block_on(client.request_identities())
            .map_err(|_| Error::Transport(TransportCode::AgentProtocol))?;
        self.listed = Some(keys);
        Ok(())
    }

    fn identity(&mut self, index: usize) -> Result<Option<AgentIdentity>> {
        let keys = self
            .listed
            .as_ref()
            .ok_or(Error::Transport(TransportCode::BadUse))?;
        Ok(keys.get(index).map(|key| AgentIdentity {
            blob: key.public_key_bytes(),
            comment: String::new(),
        }))
    }

    fn free(&mut self) {
        self.listed = None;
        self.client = None;
    }
}
