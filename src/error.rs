use std::{fmt, io};

pub type Result<T> = std::result::Result<T, Error>;

/// Raw transport value meaning "operation would block".
pub const TRANSPORT_WOULD_BLOCK: i32 = -37;

/// Every failure surfaced by the facade.
///
/// Transport errors are terminal for the owning [`Session`](crate::Session),
/// filesystem errors only for the call that produced them. [`Error::Blocked`]
/// and [`Error::Eof`] are control flow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("transport error {}", .0)]
    Transport(TransportCode),
    #[error("sftp error {}", .0)]
    Filesystem(SftpCode),
    #[error("operation would block")]
    Blocked,
    #[error("end of file")]
    Eof,
    #[error("{0}")]
    Unknown(String),
}

impl Error {
    /// Maps a raw transport value; `0` is not an error.
    pub fn from_transport_raw(raw: i32) -> Option<Error> {
        match raw {
            0 => None,
            TRANSPORT_WOULD_BLOCK => Some(Error::Blocked),
            _ => Some(match TransportCode::from_raw(raw) {
                Some(code) => Error::Transport(code),
                None => Error::Unknown(format!("unrecognized transport error {}", raw)),
            }),
        }
    }

    /// Maps a raw SFTP status; `SSH_FX_OK` is not an error.
    pub fn from_sftp_raw(raw: u32) -> Option<Error> {
        match SftpCode::from_raw(raw) {
            Some(SftpCode::Ok) => None,
            Some(SftpCode::Eof) => Some(Error::Eof),
            Some(code) => Some(Error::Filesystem(code)),
            None => Some(Error::Unknown(format!("unrecognized sftp status {}", raw))),
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Error::Blocked)
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Eof)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Filesystem(SftpCode::NoSuchFile) | Error::Filesystem(SftpCode::NoSuchPath)
        )
    }

    pub fn is_not_a_directory(&self) -> bool {
        matches!(self, Error::Filesystem(SftpCode::NotADirectory))
    }
}

/// Picks the most specific error source after a failed call.
///
/// The channel's last protocol error wins, then the session's last transport
/// error; when both are empty the failure is reported as [`Error::Unknown`]
/// built from `fallback`, never as success.
pub fn resolve<F>(sftp_last: Option<Error>, session_last: Option<Error>, fallback: F) -> Error
where
    F: FnOnce() -> String,
{
    sftp_last
        .or(session_last)
        .unwrap_or_else(|| Error::Unknown(fallback()))
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        let kind = match &value {
            Error::Filesystem(SftpCode::NoSuchFile) | Error::Filesystem(SftpCode::NoSuchPath) => {
                io::ErrorKind::NotFound
            }
            Error::Filesystem(SftpCode::PermissionDenied) | Error::Filesystem(SftpCode::WriteProtect) => {
                io::ErrorKind::PermissionDenied
            }
            Error::Filesystem(SftpCode::FileAlreadyExists) => io::ErrorKind::AlreadyExists,
            Error::Filesystem(SftpCode::InvalidFilename) => io::ErrorKind::InvalidInput,
            Error::Filesystem(SftpCode::OpUnsupported) => io::ErrorKind::Unsupported,
            Error::Filesystem(SftpCode::NoConnection) => io::ErrorKind::NotConnected,
            Error::Filesystem(SftpCode::ConnectionLost) => io::ErrorKind::ConnectionAborted,
            Error::Transport(TransportCode::Timeout) | Error::Transport(TransportCode::SocketTimeout) => {
                io::ErrorKind::TimedOut
            }
            Error::Transport(TransportCode::SocketDisconnect) => io::ErrorKind::ConnectionReset,
            Error::Blocked => io::ErrorKind::WouldBlock,
            Error::Eof => io::ErrorKind::UnexpectedEof,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, value)
    }
}

macro_rules! code_table {
    (
        $(#[$meta:meta])*
        $name:ident($repr:ty) {
            $($variant:ident = $value:literal => $symbol:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub fn from_raw(raw: $repr) -> Option<$name> {
                match raw {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Numeric value as it appears on the wire.
            pub fn code(&self) -> $repr {
                match self {
                    $($name::$variant => $value,)+
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $symbol,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} ({})", self.name(), self.code())
            }
        }
    };
}

code_table! {
    /// Transport-layer failures. "Would block" is not listed here, it is
    /// [`Error::Blocked`].
    TransportCode(i32) {
        SocketNone = -1 => "ERROR_SOCKET_NONE",
        BannerRecv = -2 => "ERROR_BANNER_RECV",
        BannerSend = -3 => "ERROR_BANNER_SEND",
        InvalidMac = -4 => "ERROR_INVALID_MAC",
        KexFailure = -5 => "ERROR_KEX_FAILURE",
        Alloc = -6 => "ERROR_ALLOC",
        SocketSend = -7 => "ERROR_SOCKET_SEND",
        KeyExchangeFailure = -8 => "ERROR_KEY_EXCHANGE_FAILURE",
        Timeout = -9 => "ERROR_TIMEOUT",
        HostKeyInit = -10 => "ERROR_HOSTKEY_INIT",
        HostKeySign = -11 => "ERROR_HOSTKEY_SIGN",
        Decrypt = -12 => "ERROR_DECRYPT",
        SocketDisconnect = -13 => "ERROR_SOCKET_DISCONNECT",
        Proto = -14 => "ERROR_PROTO",
        PasswordExpired = -15 => "ERROR_PASSWORD_EXPIRED",
        File = -16 => "ERROR_FILE",
        MethodNone = -17 => "ERROR_METHOD_NONE",
        AuthenticationFailed = -18 => "ERROR_AUTHENTICATION_FAILED",
        PublickeyUnverified = -19 => "ERROR_PUBLICKEY_UNVERIFIED",
        ChannelOutOfOrder = -20 => "ERROR_CHANNEL_OUTOFORDER",
        ChannelFailure = -21 => "ERROR_CHANNEL_FAILURE",
        ChannelRequestDenied = -22 => "ERROR_CHANNEL_REQUEST_DENIED",
        ChannelUnknown = -23 => "ERROR_CHANNEL_UNKNOWN",
        ChannelWindowExceeded = -24 => "ERROR_CHANNEL_WINDOW_EXCEEDED",
        ChannelPacketExceeded = -25 => "ERROR_CHANNEL_PACKET_EXCEEDED",
        ChannelClosed = -26 => "ERROR_CHANNEL_CLOSED",
        ChannelEofSent = -27 => "ERROR_CHANNEL_EOF_SENT",
        ScpProtocol = -28 => "ERROR_SCP_PROTOCOL",
        Zlib = -29 => "ERROR_ZLIB",
        SocketTimeout = -30 => "ERROR_SOCKET_TIMEOUT",
        SftpProtocol = -31 => "ERROR_SFTP_PROTOCOL",
        RequestDenied = -32 => "ERROR_REQUEST_DENIED",
        MethodNotSupported = -33 => "ERROR_METHOD_NOT_SUPPORTED",
        Inval = -34 => "ERROR_INVAL",
        InvalidPollType = -35 => "ERROR_INVALID_POLL_TYPE",
        PublickeyProtocol = -36 => "ERROR_PUBLICKEY_PROTOCOL",
        BufferTooSmall = -38 => "ERROR_BUFFER_TOO_SMALL",
        BadUse = -39 => "ERROR_BAD_USE",
        Compress = -40 => "ERROR_COMPRESS",
        OutOfBoundary = -41 => "ERROR_OUT_OF_BOUNDARY",
        AgentProtocol = -42 => "ERROR_AGENT_PROTOCOL",
        SocketRecv = -43 => "ERROR_SOCKET_RECV",
        Encrypt = -44 => "ERROR_ENCRYPT",
        BadSocket = -45 => "ERROR_BAD_SOCKET",
        KnownHosts = -46 => "ERROR_KNOWN_HOSTS",
        ChannelWindowFull = -47 => "ERROR_CHANNEL_WINDOW_FULL",
        KeyfileAuthFailed = -48 => "ERROR_KEYFILE_AUTH_FAILED",
        Randgen = -49 => "ERROR_RANDGEN",
        MissingUserauthBanner = -50 => "ERROR_MISSING_USERAUTH_BANNER",
        AlgoUnsupported = -51 => "ERROR_ALGO_UNSUPPORTED",
        MacFailure = -52 => "ERROR_MAC_FAILURE",
        HashInit = -53 => "ERROR_HASH_INIT",
        HashCalc = -54 => "ERROR_HASH_CALC",
    }
}

code_table! {
    /// SFTP status codes (SSH_FX_*).
    SftpCode(u32) {
        Ok = 0 => "SSH_FX_OK",
        Eof = 1 => "SSH_FX_EOF",
        NoSuchFile = 2 => "SSH_FX_NO_SUCH_FILE",
        PermissionDenied = 3 => "SSH_FX_PERMISSION_DENIED",
        Failure = 4 => "SSH_FX_FAILURE",
        BadMessage = 5 => "SSH_FX_BAD_MESSAGE",
        NoConnection = 6 => "SSH_FX_NO_CONNECTION",
        ConnectionLost = 7 => "SSH_FX_CONNECTION_LOST",
        OpUnsupported = 8 => "SSH_FX_OP_UNSUPPORTED",
        InvalidHandle = 9 => "SSH_FX_INVALID_HANDLE",
        NoSuchPath = 10 => "SSH_FX_NO_SUCH_PATH",
        FileAlreadyExists = 11 => "SSH_FX_FILE_ALREADY_EXISTS",
        WriteProtect = 12 => "SSH_FX_WRITE_PROTECT",
        NoMedia = 13 => "SSH_FX_NO_MEDIA",
        NoSpaceOnFilesystem = 14 => "SSH_FX_NO_SPACE_ON_FILESYSTEM",
        QuotaExceeded = 15 => "SSH_FX_QUOTA_EXCEEDED",
        UnknownPrincipal = 16 => "SSH_FX_UNKNOWN_PRINCIPAL",
        LockConflict = 17 => "SSH_FX_LOCK_CONFLICT",
        DirNotEmpty = 18 => "SSH_FX_DIR_NOT_EMPTY",
        NotADirectory = 19 => "SSH_FX_NOT_A_DIRECTORY",
        InvalidFilename = 20 => "SSH_FX_INVALID_FILENAME",
        LinkLoop = 21 => "SSH_FX_LINK_LOOP",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sftp_error_wins_over_session_error() {
        let err = resolve(
            Some(Error::Filesystem(SftpCode::NoSuchFile)),
            Some(Error::Transport(TransportCode::SocketSend)),
            || "unreachable".into(),
        );
        assert_eq!(err, Error::Filesystem(SftpCode::NoSuchFile));
    }

    #[test]
    fn session_error_used_when_sftp_is_clear() {
        let err = resolve(None, Some(Error::Transport(TransportCode::SocketRecv)), || "x".into());
        assert_eq!(err, Error::Transport(TransportCode::SocketRecv));
    }

    #[test]
    fn unknown_when_both_layers_are_clear() {
        let err = resolve(None, None, || "unable to open file /nope".into());
        assert_eq!(err, Error::Unknown("unable to open file /nope".into()));
        assert_eq!(err.to_string(), "unable to open file /nope");
    }

    #[test]
    fn raw_values_map_to_sentinels() {
        assert_eq!(Error::from_transport_raw(0), None);
        assert_eq!(Error::from_transport_raw(-37), Some(Error::Blocked));
        assert_eq!(
            Error::from_transport_raw(-18),
            Some(Error::Transport(TransportCode::AuthenticationFailed))
        );
        assert_eq!(Error::from_sftp_raw(0), None);
        assert_eq!(Error::from_sftp_raw(1), Some(Error::Eof));
        assert!(matches!(Error::from_transport_raw(-999), Some(Error::Unknown(_))));
    }

    #[test]
    fn codes_carry_numeric_value_and_symbol() {
        assert_eq!(SftpCode::NotADirectory.code(), 19);
        assert_eq!(SftpCode::from_raw(21), Some(SftpCode::LinkLoop));
        assert_eq!(
            Error::Filesystem(SftpCode::DirNotEmpty).to_string(),
            "sftp error SSH_FX_DIR_NOT_EMPTY (18)"
        );
        assert_eq!(TransportCode::Alloc.to_string(), "ERROR_ALLOC (-6)");
    }

    #[test]
    fn io_mapping_follows_os_semantics() {
        let not_found: io::Error = Error::Filesystem(SftpCode::NoSuchFile).into();
        assert_eq!(not_found.kind(), io::ErrorKind::NotFound);
        let denied: io::Error = Error::Filesystem(SftpCode::PermissionDenied).into();
        assert_eq!(denied.kind(), io::ErrorKind::PermissionDenied);
        let blocked: io::Error = Error::Blocked.into();
        assert_eq!(blocked.kind(), io::ErrorKind::WouldBlock);
        let other: io::Error = Error::Filesystem(SftpCode::QuotaExceeded).into();
        assert_eq!(other.kind(), io::ErrorKind::Other);
        assert!(other.to_string().contains("SSH_FX_QUOTA_EXCEEDED"));
    }
}
