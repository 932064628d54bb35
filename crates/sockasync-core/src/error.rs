//! Error types.
//!
//! Two families:
//!
//! - [`SocketError`] — the portable taxonomy delivered through completion
//!   callbacks. Every I/O outcome is resolved into one of these at the
//!   syscall boundary; none travel as control flow.
//! - [`CoreError`] — setup failures (reactor, pool, registration, config)
//!   returned from constructors and lazy initializers.

use nix::errno::Errno;
use std::fmt;

/// Portable socket error, as seen by completion callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketError {
    Success,
    /// The operation was queued; its completion arrives later.
    IoPending,
    WouldBlock,
    InProgress,
    AlreadyInProgress,
    /// The socket was torn down before the operation could run.
    Shutdown,
    ConnectionReset,
    ConnectionRefused,
    ConnectionAborted,
    NotConnected,
    IsConnected,
    AddressInUse,
    AddressNotAvailable,
    NetworkDown,
    NetworkUnreachable,
    HostUnreachable,
    TimedOut,
    MessageSize,
    NoBufferSpace,
    AccessDenied,
    InvalidArgument,
    NotSocket,
    OperationNotSupported,
    ProtocolOption,
    AddressFamilyNotSupported,
    TooManyOpenSockets,
    Interrupted,
    Fault,
    BrokenPipe,
    /// Untranslated platform errno.
    Other(i32),
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        /// True for the transient "try again" errno values.
        #[inline]
        pub fn is_would_block(errno: i32) -> bool {
            // EWOULDBLOCK == EAGAIN here
            errno == libc::EAGAIN
        }
    } else {
        /// True for the transient "try again" errno values.
        #[inline]
        pub fn is_would_block(errno: i32) -> bool {
            errno == libc::EAGAIN || errno == libc::EWOULDBLOCK
        }
    }
}

impl SocketError {
    /// Translate a platform errno. `0` maps to `Success`.
    pub fn from_errno(errno: i32) -> Self {
        if errno == 0 {
            return SocketError::Success;
        }
        if is_would_block(errno) {
            return SocketError::WouldBlock;
        }
        match errno {
            libc::EINPROGRESS => SocketError::InProgress,
            libc::EALREADY => SocketError::AlreadyInProgress,
            libc::ESHUTDOWN => SocketError::Shutdown,
            libc::ECONNRESET => SocketError::ConnectionReset,
            libc::ECONNREFUSED => SocketError::ConnectionRefused,
            libc::ECONNABORTED => SocketError::ConnectionAborted,
            libc::ENOTCONN => SocketError::NotConnected,
            libc::EISCONN => SocketError::IsConnected,
            libc::EADDRINUSE => SocketError::AddressInUse,
            libc::EADDRNOTAVAIL => SocketError::AddressNotAvailable,
            libc::ENETDOWN => SocketError::NetworkDown,
            libc::ENETUNREACH | libc::ENETRESET => SocketError::NetworkUnreachable,
            libc::EHOSTUNREACH | libc::EHOSTDOWN => SocketError::HostUnreachable,
            libc::ETIMEDOUT => SocketError::TimedOut,
            libc::EMSGSIZE => SocketError::MessageSize,
            libc::ENOBUFS | libc::ENOMEM => SocketError::NoBufferSpace,
            libc::EACCES | libc::EPERM => SocketError::AccessDenied,
            libc::EINVAL => SocketError::InvalidArgument,
            libc::ENOTSOCK | libc::EBADF => SocketError::NotSocket,
            libc::EOPNOTSUPP | libc::EPROTONOSUPPORT | libc::ESOCKTNOSUPPORT => {
                SocketError::OperationNotSupported
            }
            libc::ENOPROTOOPT => SocketError::ProtocolOption,
            libc::EAFNOSUPPORT | libc::EPFNOSUPPORT => SocketError::AddressFamilyNotSupported,
            libc::EMFILE | libc::ENFILE => SocketError::TooManyOpenSockets,
            libc::EINTR => SocketError::Interrupted,
            libc::EFAULT => SocketError::Fault,
            libc::EPIPE => SocketError::BrokenPipe,
            other => SocketError::Other(other),
        }
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == SocketError::Success
    }
}

impl From<Errno> for SocketError {
    fn from(errno: Errno) -> Self {
        SocketError::from_errno(errno as i32)
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::IoPending => write!(f, "operation pending"),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::InProgress => write!(f, "operation in progress"),
            Self::AlreadyInProgress => write!(f, "operation already in progress"),
            Self::Shutdown => write!(f, "socket shut down"),
            Self::ConnectionReset => write!(f, "connection reset by peer"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::ConnectionAborted => write!(f, "connection aborted"),
            Self::NotConnected => write!(f, "socket not connected"),
            Self::IsConnected => write!(f, "socket already connected"),
            Self::AddressInUse => write!(f, "address in use"),
            Self::AddressNotAvailable => write!(f, "address not available"),
            Self::NetworkDown => write!(f, "network down"),
            Self::NetworkUnreachable => write!(f, "network unreachable"),
            Self::HostUnreachable => write!(f, "host unreachable"),
            Self::TimedOut => write!(f, "timed out"),
            Self::MessageSize => write!(f, "message too long"),
            Self::NoBufferSpace => write!(f, "no buffer space available"),
            Self::AccessDenied => write!(f, "access denied"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NotSocket => write!(f, "not a socket"),
            Self::OperationNotSupported => write!(f, "operation not supported"),
            Self::ProtocolOption => write!(f, "protocol option not supported"),
            Self::AddressFamilyNotSupported => write!(f, "address family not supported"),
            Self::TooManyOpenSockets => write!(f, "too many open sockets"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Fault => write!(f, "bad address"),
            Self::BrokenPipe => write!(f, "broken pipe"),
            Self::Other(e) => write!(f, "socket error: errno {}", e),
        }
    }
}

impl std::error::Error for SocketError {}

/// Setup-time failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Reactor instance could not be created.
    ReactorSetup(i32),
    /// Descriptor could not be registered with the reactor.
    Register(i32),
    /// A worker or dispatch thread could not be spawned.
    SpawnFailed,
    /// Socket creation or option setup failed.
    Socket(SocketError),
    /// Invalid configuration value.
    InvalidConfig(&'static str),
    /// OS error with errno.
    Os(i32),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReactorSetup(e) => write!(f, "reactor setup: errno {}", e),
            Self::Register(e) => write!(f, "reactor register: errno {}", e),
            Self::SpawnFailed => write!(f, "failed to spawn thread"),
            Self::Socket(e) => write!(f, "socket: {}", e),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<SocketError> for CoreError {
    fn from(e: SocketError) -> Self {
        CoreError::Socket(e)
    }
}

impl From<Errno> for CoreError {
    fn from(errno: Errno) -> Self {
        CoreError::Os(errno as i32)
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
