pub mod agent;
pub mod config;
pub mod engine;
pub mod error;
pub mod filesystem;
pub mod handle;
pub mod hostkey;
pub mod session;
pub mod sftp;

#[cfg(feature = "impl-memory")]
pub mod impl_memory;

#[cfg(all(feature = "impl-russh", unix))]
pub mod impl_russh;

#[cfg(feature = "impl-ssh2")]
pub mod impl_ssh2;

pub use agent::{Agent, Identities, Identity};
pub use config::SessionConfig;
pub use error::{Error, Result, SftpCode, TransportCode};
pub use filesystem::{AttrFlags, FileType, Metadata, OpenFlags, OpenOptions, RemoteAttributes, RenameFlags};
pub use handle::{Dir, File};
pub use hostkey::{HashType, HostKeyDigest};
pub use session::{DisconnectCode, Session, SessionState};
pub use sftp::SftpSession;
