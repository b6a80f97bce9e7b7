use std::{path::PathBuf, time::Duration};

/// Environment variable naming the identity agent socket.
pub const DEFAULT_AGENT_SOCKET_ENV: &str = "SSH_AUTH_SOCK";

/// Size of the buffer directory entry names are read into.
pub const DEFAULT_NAME_BUFFER_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub(crate) blocked_retries: u32,
    pub(crate) blocked_backoff: Duration,
    pub(crate) agent_socket: Option<PathBuf>,
    pub(crate) agent_socket_env: String,
    pub(crate) name_buffer_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            blocked_retries: 8,
            blocked_backoff: Duration::from_millis(25),
            agent_socket: None,
            agent_socket_env: DEFAULT_AGENT_SOCKET_ENV.into(),
            name_buffer_len: DEFAULT_NAME_BUFFER_LEN,
        }
    }
}

impl SessionConfig {
    pub fn new() -> SessionConfig {
        SessionConfig::default()
    }

    /// How many times a would-block answer is retried before it reaches the caller.
    pub fn blocked_retries(&mut self, retries: u32) -> &mut Self {
        self.blocked_retries = retries;
        self
    }

    pub fn blocked_backoff(&mut self, backoff: Duration) -> &mut Self {
        self.blocked_backoff = backoff;
        self
    }

    pub fn agent_socket(&mut self, path: PathBuf) -> &mut Self {
        self.agent_socket = Some(path);
        self
    }

    pub fn agent_socket_env(&mut self, variable: String) -> &mut Self {
        self.agent_socket_env = variable;
        self
    }

    pub fn name_buffer_len(&mut self, len: usize) -> &mut Self {
        self.name_buffer_len = len;
        self
    }

    pub fn get_blocked_retries(&self) -> u32 {
        self.blocked_retries
    }

    pub fn get_name_buffer_len(&self) -> usize {
        self.name_buffer_len
    }

    /// The agent socket to use: the configured one, else the environment's.
    pub fn resolve_agent_socket(&self) -> Option<PathBuf> {
        if let Some(path) = &self.agent_socket {
            return Some(path.clone());
        }
        std::env::var_os(&self.agent_socket_env)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    }
}
