//! Engine on top of the pure Rust russh stack.
//!
//! russh is async; every call is driven to completion on a private
//! current-thread runtime owned by the engine, which keeps the facade blocking.
//! The connection task russh spawns only makes progress while a call is in
//! flight.
//!
//! Differences from a libssh2 transport: the server's advertised method list
//! is not exposed by russh, so [`TransportEngine::list_auth_methods`] fails
//! with `MethodNotSupported`; agent identities carry no comment.

mod agent;
mod sftp;

use std::{net::TcpStream, rc::Rc, sync::Arc};

use async_trait::async_trait;
use russh::{
    client::{self, Handle},
    Disconnect,
};
use russh_keys::{key::PublicKey, PublicKeyBase64};
use russh_sftp::client::{error::Error as SftpError, RawSftpSession};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    runtime::Runtime,
    sync::Mutex,
};
use tracing::{debug, warn};

pub use agent::RusshAgent;
pub use sftp::RusshSftp;

use crate::{
    engine::TransportEngine,
    error::{Error, Result, TransportCode},
    hostkey::{HashType, HostKeyDigest},
    session::DisconnectCode,
};

/// Records the server key during key exchange and accepts it. Whether the key
/// is trusted is decided by the caller from [`Session::host_key_digest`](crate::Session::host_key_digest).
pub(crate) struct HostKeyCapture {
    host_key: Arc<Mutex<Option<Vec<u8>>>>,
}

#[async_trait]
impl client::Handler for HostKeyCapture {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        *self.host_key.lock().await = Some(server_public_key.public_key_bytes());
        Ok(true)
    }
}

pub struct RusshEngine {
    rt: Rc<Runtime>,
    config: Arc<client::Config>,
    handle: Option<Handle<HostKeyCapture>>,
    host_key: Arc<Mutex<Option<Vec<u8>>>>,
    last_error: Option<Error>,
}

impl RusshEngine {
    pub fn new(config: client::Config) -> Result<RusshEngine> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|_| Error::Transport(TransportCode::Alloc))?;
        Ok(RusshEngine {
            rt: Rc::new(rt),
            config: Arc::new(config),
            handle: None,
            host_key: Arc::new(Mutex::new(None)),
            last_error: None,
        })
    }

    fn fail(&mut self, err: Error) -> Error {
        self.last_error = Some(err.clone());
        err
    }

    fn record(&mut self, err: russh::Error) -> Error {
        debug!("russh call failed: {}", err);
        self.fail(Error::Transport(transport_code(&err)))
    }

    fn handle(&mut self) -> Result<&mut Handle<HostKeyCapture>> {
        match self.handle {
            Some(ref mut handle) => Ok(handle),
            None => {
                self.last_error = Some(Error::Transport(TransportCode::SocketNone));
                Err(Error::Transport(TransportCode::SocketNone))
            }
        }
    }
}

impl TransportEngine for RusshEngine {
    type Sftp = RusshSftp;
    type Agent = RusshAgent;

    fn init() -> Result<RusshEngine> {
        RusshEngine::new(client::Config::default())
    }

    fn handshake(&mut self, socket: TcpStream) -> Result<()> {
        self.last_error = None;
        // tokio drives the socket itself and needs it non-blocking
        if socket.set_nonblocking(true).is_err() {
            return Err(self.fail(Error::Transport(TransportCode::BadSocket)));
        }
        let handler = HostKeyCapture {
            host_key: self.host_key.clone(),
        };
        let config = self.config.clone();
        let connected = self.rt.block_on(async move {
            let stream = tokio::net::TcpStream::from_std(socket)?;
            let handle = client::connect_stream(config, stream, handler).await?;
            Ok::<_, russh::Error>(handle)
        });
        match connected {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(err) => Err(self.record(err)),
        }
    }

    fn disconnect(&mut self, code: DisconnectCode, description: &str, language: &str) -> Result<()> {
        self.last_error = None;
        let reason = disconnect_reason(code);
        let rt = self.rt.clone();
        let handle = self.handle()?;
        match rt.block_on(handle.disconnect(reason, description, language)) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.record(err)),
        }
    }

    fn last_error(&self) -> Option<Error> {
        self.last_error.clone()
    }

    fn host_key_digest(&self, hash_type: HashType) -> Result<HostKeyDigest> {
        let host_key = self.rt.block_on(self.host_key.lock()).clone();
        match host_key {
            Some(blob) => Ok(HostKeyDigest::compute(hash_type, &blob)),
            None => Err(Error::Transport(TransportCode::HostKeyInit)),
        }
    }

    fn list_auth_methods(&mut self, _username: &str) -> Result<String> {
        Err(self.fail(Error::Transport(TransportCode::MethodNotSupported)))
    }

    fn authenticate_with_password(&mut self, username: &str, password: &str) -> Result<()> {
        self.last_error = None;
        let rt = self.rt.clone();
        let handle = self.handle()?;
        match rt.block_on(handle.authenticate_password(username, password)) {
            Ok(true) => Ok(()),
            Ok(false) => Err(self.fail(Error::Transport(TransportCode::AuthenticationFailed))),
            Err(err) => Err(self.record(err)),
        }
    }

    fn authenticate_with_identity(&mut self, agent: &mut RusshAgent, username: &str, identity: usize) -> Result<()> {
        self.last_error = None;
        let key = match agent.key(identity) {
            Some(key) => key,
            None => return Err(self.fail(Error::Transport(TransportCode::BadUse))),
        };
        let client = match agent.take_client() {
            Some(client) => client,
            None => return Err(self.fail(Error::Transport(TransportCode::BadUse))),
        };

        let rt = self.rt.clone();
        let handle = self.handle()?;
        let (client, result) = rt.block_on(handle.authenticate_future(username, key, client));
        agent.restore_client(client);
        match result {
            Ok(true) => Ok(()),
            Ok(false) => Err(self.fail(Error::Transport(TransportCode::PublickeyUnverified))),
            Err(err) => {
                warn!("Agent failed to sign the authentication request: {:?}", err);
                Err(self.fail(Error::Transport(TransportCode::AgentProtocol)))
            }
        }
    }

    fn sftp_init(&mut self) -> Result<RusshSftp> {
        self.last_error = None;
        let rt = self.rt.clone();
        let handle = self.handle()?;
        let opened = rt.block_on(async {
            let channel = handle.channel_open_session().await?;
            channel.request_subsystem(true, "sftp").await?;
            Ok::<_, russh::Error>(channel)
        });
        let channel = match opened {
            Ok(channel) => channel,
            Err(err) => return Err(self.record(err)),
        };

        match open_raw_sftp(&rt, channel.into_stream()) {
            Ok(raw) => Ok(RusshSftp::new(rt, raw)),
            Err(err) => {
                debug!("SFTP version negotiation failed: {}", err);
                Err(self.fail(Error::Transport(TransportCode::SftpProtocol)))
            }
        }
    }

    fn agent_init(&mut self) -> Result<RusshAgent> {
        Ok(RusshAgent::new(self.rt.clone()))
    }

    fn free(&mut self) -> Result<()> {
        self.handle = None;
        Ok(())
    }
}

/// Builds the request level client and negotiates the protocol version.
///
/// RawSftpSession spawns its reader task, so it has to be built on the runtime.
pub(crate) fn open_raw_sftp<S>(rt: &Runtime, stream: S) -> std::result::Result<RawSftpSession, SftpError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    rt.block_on(async move {
        let raw = RawSftpSession::new(stream);
        raw.init().await.map(|_| raw)
    })
}

fn disconnect_reason(code: DisconnectCode) -> Disconnect {
    match code {
        DisconnectCode::HostNotAllowedToConnect => Disconnect::HostNotAllowedToConnect,
        DisconnectCode::ProtocolError => Disconnect::ProtocolError,
        DisconnectCode::KeyExchangeFailed => Disconnect::KeyExchangeFailed,
        DisconnectCode::Reserved => Disconnect::Reserved,
        DisconnectCode::MacError => Disconnect::MACError,
        DisconnectCode::CompressionError => Disconnect::CompressionError,
        DisconnectCode::ServiceNotAvailable => Disconnect::ServiceNotAvailable,
        DisconnectCode::ProtocolVersionNotSupported => Disconnect::ProtocolVersionNotSupported,
        DisconnectCode::HostKeyNotVerifiable => Disconnect::HostKeyNotVerifiable,
        DisconnectCode::ConnectionLost => Disconnect::ConnectionLost,
        DisconnectCode::ByApplication => Disconnect::ByApplication,
        DisconnectCode::TooManyConnections => Disconnect::TooManyConnections,
        DisconnectCode::AuthCancelledByUser => Disconnect::AuthCancelledByUser,
        DisconnectCode::NoMoreAuthMethodsAvailable => Disconnect::NoMoreAuthMethodsAvailable,
        DisconnectCode::IllegalUserName => Disconnect::IllegalUserName,
    }
}

fn transport_code(err: &russh::Error) -> TransportCode {
    match err {
        russh::Error::Disconnect | russh::Error::HUP => TransportCode::SocketDisconnect,
        russh::Error::ConnectionTimeout | russh::Error::InactivityTimeout => TransportCode::Timeout,
        russh::Error::KexInit
        | russh::Error::NoCommonKexAlgo
        | russh::Error::NoCommonKeyAlgo
        | russh::Error::NoCommonCipher => TransportCode::KexFailure,
        russh::Error::WrongServerSig => TransportCode::HostKeySign,
        russh::Error::NotAuthenticated => TransportCode::AuthenticationFailed,
        russh::Error::ChannelOpenFailure(_) => TransportCode::ChannelFailure,
        russh::Error::SendError => TransportCode::SocketSend,
        russh::Error::IO(_) => TransportCode::SocketRecv,
        _ => TransportCode::Proto,
    }
}
