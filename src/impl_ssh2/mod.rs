//! Engine over libssh2 through the `ssh2` bindings.
//!
//! The session is switched to blocking mode after the handshake, so libssh2
//! never answers "would block" here. `ssh2` gives no way to point the agent at
//! a socket: only the one named by `SSH_AUTH_SOCK` is reachable, any other
//! path fails with `MethodNotSupported`.

mod sftp;

use std::{
    net::TcpStream,
    path::{Path, PathBuf},
};

use ssh2::ErrorCode;
use tracing::debug;

pub use sftp::Ssh2Sftp;

use crate::{
    engine::{AgentEngine, AgentIdentity, TransportEngine},
    error::{Error, Result, TransportCode},
    hostkey::{HashType, HostKeyDigest},
    session::DisconnectCode,
};

const AGENT_SOCKET_ENV: &str = "SSH_AUTH_SOCK";

pub struct Ssh2Engine {
    session: ssh2::Session,
    last_error: Option<Error>,
}

impl Ssh2Engine {
    pub fn new() -> Result<Ssh2Engine> {
        let session = ssh2::Session::new().map_err(|_| Error::Transport(TransportCode::Alloc))?;
        Ok(Ssh2Engine {
            session,
            last_error: None,
        })
    }

    fn record(&mut self, err: ssh2::Error) -> Error {
        let mapped = transport_error(&err);
        self.last_error = Some(mapped.clone());
        mapped
    }
}

/// Session level code of a libssh2 failure. SFTP statuses are the channel's business.
pub(crate) fn transport_error(err: &ssh2::Error) -> Error {
    match err.code() {
        ErrorCode::Session(raw) => {
            Error::from_transport_raw(raw).unwrap_or(Error::Unknown(err.message().to_string()))
        }
        ErrorCode::SFTP(_) => Error::Transport(TransportCode::SftpProtocol),
    }
}

/// libssh2 only ever connects to the socket named by `SSH_AUTH_SOCK`.
fn reaches_socket(requested: Option<&Path>, default_socket: Option<&Path>) -> bool {
    match requested {
        Some(path) => default_socket == Some(path),
        None => true,
    }
}

fn disconnect_code(code: DisconnectCode) -> ssh2::DisconnectCode {
    match code {
        DisconnectCode::HostNotAllowedToConnect => ssh2::DisconnectCode::HostNotAllowedToConnect,
        DisconnectCode::ProtocolError => ssh2::DisconnectCode::ProtocolError,
        DisconnectCode::KeyExchangeFailed => ssh2::DisconnectCode::KeyExchangeFailed,
        DisconnectCode::Reserved => ssh2::DisconnectCode::Reserved,
        DisconnectCode::MacError => ssh2::DisconnectCode::MacError,
        DisconnectCode::CompressionError => ssh2::DisconnectCode::CompressionError,
        DisconnectCode::ServiceNotAvailable => ssh2::DisconnectCode::ServiceNotAvailable,
        DisconnectCode::ProtocolVersionNotSupported => ssh2::DisconnectCode::ProtocolVersionNotSupported,
        DisconnectCode::HostKeyNotVerifiable => ssh2::DisconnectCode::HostKeyNotVerifiable,
        DisconnectCode::ConnectionLost => ssh2::DisconnectCode::ConnectionLost,
        DisconnectCode::ByApplication => ssh2::DisconnectCode::ByApplication,
        DisconnectCode::TooManyConnections => ssh2::DisconnectCode::TooManyConnections,
        DisconnectCode::AuthCancelledByUser => ssh2::DisconnectCode::AuthCancelledByUser,
        DisconnectCode::NoMoreAuthMethodsAvailable => ssh2::DisconnectCode::NoMoreAuthMethodsAvailable,
        DisconnectCode::IllegalUserName => ssh2::DisconnectCode::IllegalUserName,
    }
}

impl TransportEngine for Ssh2Engine {
    type Sftp = Ssh2Sftp;
    type Agent = Ssh2Agent;

    fn init() -> Result<Ssh2Engine> {
        Ssh2Engine::new()
    }

    fn handshake(&mut self, socket: TcpStream) -> Result<()> {
        self.last_error = None;
        self.session.set_tcp_stream(socket);
        self.session.set_blocking(true);
        self.session.handshake().map_err(|err| self.record(err))
    }

    fn disconnect(&mut self, code: DisconnectCode, description: &str, language: &str) -> Result<()> {
        self.last_error = None;
        let language = (!language.is_empty()).then_some(language);
        self.session
            .disconnect(Some(disconnect_code(code)), description, language)
            .map_err(|err| self.record(err))
    }

    fn last_error(&self) -> Option<Error> {
        self.last_error.clone()
    }

    fn host_key_digest(&self, hash_type: HashType) -> Result<HostKeyDigest> {
        let wire_type = match hash_type {
            HashType::Md5 => ssh2::HashType::Md5,
            HashType::Sha1 => ssh2::HashType::Sha1,
            HashType::Sha256 => ssh2::HashType::Sha256,
        };
        match self.session.host_key_hash(wire_type) {
            Some(bytes) => Ok(HostKeyDigest::new(hash_type, bytes.to_vec())),
            None => Err(Error::Transport(TransportCode::HostKeyInit)),
        }
    }

    fn list_auth_methods(&mut self, username: &str) -> Result<String> {
        self.last_error = None;
        match self.session.auth_methods(username) {
            Ok(methods) => Ok(methods.to_string()),
            Err(err) => Err(self.record(err)),
        }
    }

    fn authenticate_with_password(&mut self, username: &str, password: &str) -> Result<()> {
        self.last_error = None;
        self.session
            .userauth_password(username, password)
            .map_err(|err| self.record(err))
    }

    fn authenticate_with_identity(&mut self, agent: &mut Ssh2Agent, username: &str, identity: usize) -> Result<()> {
        self.last_error = None;
        let key = match agent.keys.get(identity) {
            Some(key) => key,
            None => return Err(Error::Transport(TransportCode::BadUse)),
        };
        agent.agent.userauth(username, key).map_err(|err| self.record(err))
    }

    fn sftp_init(&mut self) -> Result<Ssh2Sftp> {
        self.last_error = None;
        match self.session.sftp() {
            Ok(sftp) => Ok(Ssh2Sftp::new(sftp)),
            Err(err) => Err(self.record(err)),
        }
    }

    fn agent_init(&mut self) -> Result<Ssh2Agent> {
        self.last_error = None;
        match self.session.agent() {
            Ok(agent) => Ok(Ssh2Agent {
                agent,
                keys: Vec::new(),
                listed: false,
            }),
            Err(err) => Err(self.record(err)),
        }
    }

    fn free(&mut self) -> Result<()> {
        // libssh2 frees the session when the last handle to it drops
        Ok(())
    }
}

pub struct Ssh2Agent {
    agent: ssh2::Agent,
    keys: Vec<ssh2::PublicKey>,
    listed: bool,
}

impl AgentEngine for Ssh2Agent {
    fn connect(&mut self, path: Option<&Path>) -> Result<()> {
        let default_socket = std::env::var_os(AGENT_SOCKET_ENV).map(PathBuf::from);
        if !reaches_socket(path, default_socket.as_deref()) {
            debug!("libssh2 can't reach an agent outside {}: {:?}", AGENT_SOCKET_ENV, path);
            return Err(Error::Transport(TransportCode::MethodNotSupported));
        }
        self.agent.connect().map_err(|err| transport_error(&err))
    }

    fn disconnect(&mut self) -> Result<()> {
        self.agent.disconnect().map_err(|err| transport_error(&err))
    }

    fn list_identities(&mut self) -> Result<()> {
        self.agent.list_identities().map_err(|err| transport_error(&err))?;
        self.keys = self.agent.identities().map_err(|err| transport_error(&err))?;
        self.listed = true;
        Ok(())
    }

    fn identity(&mut self, index: usize) -> Result<Option<AgentIdentity>> {
        if !self.listed {
            return Err(Error::Transport(TransportCode::BadUse));
        }
        Ok(self.keys.get(index).map(|key| AgentIdentity {
            blob: key.blob().to_vec(),
            comment: key.comment().to_string(),
        }))
    }

    fn free(&mut self) {
        self.keys.clear();
        self.listed = false;
    }
}
