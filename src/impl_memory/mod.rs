//! In-process engine serving a remote tree held in memory.
//!
//! A [`MemoryServer`] is the "remote host": its tree, accounts, agent
//! identities and injected faults. Every [`MemoryEngine`] made from it shares
//! that state, so a test can drive the facade and then inspect the host.

mod agent;
mod sftp;

use std::{
    cell::{RefCell, RefMut},
    collections::{BTreeMap, HashMap},
    net::TcpStream,
    path::PathBuf,
    rc::Rc,
    time::{SystemTime, UNIX_EPOCH},
};

pub use agent::MemoryAgent;
pub use sftp::MemorySftp;
use tracing::debug;

use crate::{
    engine::{AgentEngine, AgentIdentity, TransportEngine},
    error::{Error, Result, SftpCode, TransportCode},
    filesystem::{mode, RemoteAttributes},
    hostkey::{HashType, HostKeyDigest},
    session::DisconnectCode,
};

const DEFAULT_HOST_KEY: &[u8] = b"\x00\x00\x00\x0bssh-ed25519\x00\x00\x00\x20memory-host-key-0000000000000000";
const DEFAULT_OWNER: u32 = 1000;

/// Handle on the shared remote state. Clones share everything.
#[derive(Clone)]
pub struct MemoryServer {
    inner: Rc<RefCell<ServerState>>,
}

pub(crate) struct ServerState {
    pub(crate) nodes: BTreeMap<String, Node>,
    passwords: HashMap<String, String>,
    authorized_keys: HashMap<String, Vec<Vec<u8>>>,
    auth_methods: String,
    host_key: Vec<u8>,
    blocked_auth_rounds: u32,
    pub(crate) identities: Vec<std::result::Result<AgentIdentity, Error>>,
    pub(crate) agent_available: bool,
    pub(crate) agent_paths: Vec<Option<PathBuf>>,
    pub(crate) session_error: Option<Error>,
    pub(crate) write_chunk: Option<usize>,
    pub(crate) failing_opens: HashMap<String, Option<Error>>,
    pub(crate) failing_readdir: Option<(usize, SftpCode)>,
    pub(crate) failing_write: Option<(usize, SftpCode)>,
    sftp_unavailable: bool,
    untracked_errors: bool,
    pub(crate) open_handles: usize,
    pub(crate) sftp_shutdowns: usize,
    pub(crate) agents_freed: usize,
    disconnects: Vec<String>,
    released_sessions: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) attributes: RemoteAttributes,
    pub(crate) data: Vec<u8>,
    pub(crate) target: Option<String>,
}

impl Node {
    pub(crate) fn new(type_bits: u32, permissions: u32) -> Node {
        let now = now_seconds();
        Node {
            attributes: RemoteAttributes::new()
                .with_size(0)
                .with_owner(DEFAULT_OWNER, DEFAULT_OWNER)
                .with_permissions(type_bits | (permissions & mode::PERMISSION_MASK))
                .with_times(now, now),
            data: Vec::new(),
            target: None,
        }
    }

    pub(crate) fn is_dir(&self) -> bool {
        self.type_bits() == mode::S_IFDIR
    }

    pub(crate) fn type_bits(&self) -> u32 {
        self.attributes.permissions().unwrap_or_default() & mode::S_IFMT
    }

    pub(crate) fn set_data_len(&mut self, len: usize) {
        self.data.resize(len, 0);
        self.attributes = self.attributes.with_size(len as u64);
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::new(mode::S_IFDIR, 0o755));
        MemoryServer {
            inner: Rc::new(RefCell::new(ServerState {
                nodes,
                passwords: HashMap::new(),
                authorized_keys: HashMap::new(),
                auth_methods: "publickey,password".into(),
                host_key: DEFAULT_HOST_KEY.to_vec(),
                blocked_auth_rounds: 0,
                identities: Vec::new(),
                agent_available: true,
                agent_paths: Vec::new(),
                session_error: None,
                write_chunk: None,
                failing_opens: HashMap::new(),
                failing_readdir: None,
                failing_write: None,
                sftp_unavailable: false,
                untracked_errors: false,
                open_handles: 0,
                sftp_shutdowns: 0,
                agents_freed: 0,
                disconnects: Vec::new(),
                released_sessions: 0,
            })),
        }
    }
}

impl MemoryServer {
    pub fn new() -> MemoryServer {
        MemoryServer::default()
    }

    /// A fresh engine connected to this host.
    pub fn engine(&self) -> MemoryEngine {
        MemoryEngine {
            server: self.clone(),
            socket: None,
        }
    }

    pub fn add_user(&self, username: &str, password: &str) -> &Self {
        self.state().passwords.insert(username.into(), password.into());
        self
    }

    /// Lets `username` in with the identity whose public key is `blob`.
    pub fn authorize_key(&self, username: &str, blob: &[u8]) -> &Self {
        self.state()
            .authorized_keys
            .entry(username.into())
            .or_default()
            .push(blob.to_vec());
        self
    }

    pub fn set_auth_methods(&self, methods: &str) -> &Self {
        self.state().auth_methods = methods.into();
        self
    }

    pub fn set_host_key(&self, blob: &[u8]) -> &Self {
        self.state().host_key = blob.to_vec();
        self
    }

    /// The next `rounds` authentication attempts answer "would block".
    pub fn block_auth_rounds(&self, rounds: u32) -> &Self {
        self.state().blocked_auth_rounds = rounds;
        self
    }

    pub fn add_identity(&self, blob: &[u8], comment: &str) -> &Self {
        self.state().identities.push(Ok(AgentIdentity {
            blob: blob.to_vec(),
            comment: comment.into(),
        }));
        self
    }

    /// An agent slot that fails to load with `err`.
    pub fn add_broken_identity(&self, err: Error) -> &Self {
        self.state().identities.push(Err(err));
        self
    }

    pub fn set_agent_available(&self, available: bool) -> &Self {
        self.state().agent_available = available;
        self
    }

    /// Caps how many bytes a single remote write accepts.
    pub fn limit_write_chunk(&self, chunk: usize) -> &Self {
        self.state().write_chunk = Some(chunk);
        self
    }

    /// Makes opening `path` fail below the SFTP layer, leaving `session_error`
    /// (or nothing at all) as the only trace.
    pub fn fail_open(&self, path: &str, session_error: Option<Error>) -> &Self {
        self.state().failing_opens.insert(normalize(path), session_error);
        self
    }

    /// Lets `entries` directory reads through, then answers the next one with `code`.
    pub fn fail_readdir_after(&self, entries: usize, code: SftpCode) -> &Self {
        self.state().failing_readdir = Some((entries, code));
        self
    }

    /// Lets `writes` remote writes through, then answers the next one with `code`.
    pub fn fail_write_after(&self, writes: usize, code: SftpCode) -> &Self {
        self.state().failing_write = Some((writes, code));
        self
    }

    /// Transport failures are returned but no longer kept as the last error.
    pub fn untrack_errors(&self) -> &Self {
        self.state().untracked_errors = true;
        self
    }

    pub fn refuse_sftp(&self) -> &Self {
        self.state().sftp_unavailable = true;
        self
    }

    pub fn put_dir(&self, path: &str, permissions: u32) -> &Self {
        self.state()
            .nodes
            .insert(normalize(path), Node::new(mode::S_IFDIR, permissions));
        self
    }

    pub fn put_file(&self, path: &str, data: &[u8], permissions: u32) -> &Self {
        let mut node = Node::new(mode::S_IFREG, permissions);
        node.data = data.to_vec();
        node.set_data_len(data.len());
        self.state().nodes.insert(normalize(path), node);
        self
    }

    pub fn put_symlink(&self, path: &str, target: &str) -> &Self {
        let mut node = Node::new(mode::S_IFLNK, 0o777);
        node.target = Some(normalize(target));
        self.state().nodes.insert(normalize(path), node);
        self
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state().nodes.contains_key(&normalize(path))
    }

    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        self.state().nodes.get(&normalize(path)).map(|node| node.data.clone())
    }

    pub fn attributes(&self, path: &str) -> Option<RemoteAttributes> {
        self.state().nodes.get(&normalize(path)).map(|node| node.attributes)
    }

    /// Handles opened and not yet closed, across every channel.
    pub fn open_handles(&self) -> usize {
        self.state().open_handles
    }

    pub fn sftp_shutdowns(&self) -> usize {
        self.state().sftp_shutdowns
    }

    pub fn agents_freed(&self) -> usize {
        self.state().agents_freed
    }

    /// Sockets the agent was asked to connect to, in order.
    pub fn agent_paths(&self) -> Vec<Option<PathBuf>> {
        self.state().agent_paths.clone()
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.state().disconnects.clone()
    }

    pub fn released_sessions(&self) -> usize {
        self.state().released_sessions
    }

    pub(crate) fn state(&self) -> RefMut<'_, ServerState> {
        self.inner.borrow_mut()
    }
}

/// Transport engine over a [`MemoryServer`].
pub struct MemoryEngine {
    server: MemoryServer,
    socket: Option<TcpStream>,
}

impl MemoryEngine {
    pub fn server(&self) -> &MemoryServer {
        &self.server
    }

    fn fail(&self, err: Error) -> Error {
        let mut state = self.server.state();
        if !state.untracked_errors {
            state.session_error = Some(err.clone());
        }
        err
    }

    fn require_socket(&self) -> Result<()> {
        match self.socket {
            Some(_) => Ok(()),
            None => Err(self.fail(Error::Transport(TransportCode::SocketNone))),
        }
    }

    fn take_blocked_round(&self) -> bool {
        let mut state = self.server.state();
        if state.blocked_auth_rounds == 0 {
            return false;
        }
        state.blocked_auth_rounds -= 1;
        true
    }
}

impl TransportEngine for MemoryEngine {
    type Sftp = MemorySftp;
    type Agent = MemoryAgent;

    /// An engine on a fresh, empty host.
    fn init() -> Result<MemoryEngine> {
        Ok(MemoryServer::new().engine())
    }

    fn handshake(&mut self, socket: TcpStream) -> Result<()> {
        self.server.state().session_error = None;
        debug!("Memory handshake over {:?}", socket.local_addr());
        self.socket = Some(socket);
        Ok(())
    }

    fn disconnect(&mut self, code: DisconnectCode, description: &str, _language: &str) -> Result<()> {
        self.server.state().session_error = None;
        self.require_socket()?;
        debug!("Memory disconnect {:?}", code);
        self.server.state().disconnects.push(description.into());
        Ok(())
    }

    fn last_error(&self) -> Option<Error> {
        self.server.state().session_error.clone()
    }

    fn host_key_digest(&self, hash_type: HashType) -> Result<HostKeyDigest> {
        self.require_socket()?;
        Ok(HostKeyDigest::compute(hash_type, &self.server.state().host_key))
    }

    fn list_auth_methods(&mut self, _username: &str) -> Result<String> {
        self.server.state().session_error = None;
        self.require_socket()?;
        Ok(self.server.state().auth_methods.clone())
    }

    fn authenticate_with_password(&mut self, username: &str, password: &str) -> Result<()> {
        self.server.state().session_error = None;
        self.require_socket()?;
        if self.take_blocked_round() {
            return Err(Error::Blocked);
        }
        let accepted = self.server.state().passwords.get(username).map(String::as_str) == Some(password);
        if !accepted {
            return Err(self.fail(Error::Transport(TransportCode::AuthenticationFailed)));
        }
        Ok(())
    }

    fn authenticate_with_identity(&mut self, agent: &mut MemoryAgent, username: &str, identity: usize) -> Result<()> {
        self.server.state().session_error = None;
        self.require_socket()?;
        if self.take_blocked_round() {
            return Err(Error::Blocked);
        }
        let blob = match agent.identity(identity)? {
            Some(identity) => identity.blob,
            None => return Err(self.fail(Error::Transport(TransportCode::BadUse))),
        };
        let authorized = self
            .server
            .state()
            .authorized_keys
            .get(username)
            .is_some_and(|keys| keys.contains(&blob));
        if !authorized {
            return Err(self.fail(Error::Transport(TransportCode::PublickeyUnverified)));
        }
        Ok(())
    }

    fn sftp_init(&mut self) -> Result<MemorySftp> {
        self.server.state().session_error = None;
        self.require_socket()?;
        if self.server.state().sftp_unavailable {
            return Err(self.fail(Error::Transport(TransportCode::ChannelFailure)));
        }
        Ok(MemorySftp::new(self.server.clone()))
    }

    fn agent_init(&mut self) -> Result<MemoryAgent> {
        Ok(MemoryAgent::new(self.server.clone()))
    }

    fn free(&mut self) -> Result<()> {
        self.socket = None;
        self.server.state().released_sessions += 1;
        Ok(())
    }
}

/// Counts one call down; `Some(code)` once the allowance is used up.
pub(crate) fn take_fault(fault: &mut Option<(usize, SftpCode)>) -> Option<SftpCode> {
    match fault {
        Some((0, code)) => {
            let code = *code;
            *fault = None;
            Some(code)
        }
        Some((remaining, _)) => {
            *remaining -= 1;
            None
        }
        None => None,
    }
}

/// Absolute form of `path` with `.`, `..` and repeated slashes resolved.
pub(crate) fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

pub(crate) fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(index) => Some(&path[..index]),
        None => None,
    }
}

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
