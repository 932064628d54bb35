//! Socket address buffer passed through accept, connect and addressed
//! transfers.

use std::fmt;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// A `sockaddr_storage` plus the length the kernel reported (or the length
/// of the address written into it).
#[derive(Clone, Copy)]
pub struct SockAddrBuf {
    storage: libc::sockaddr_storage,
    len: libc::socklen_t,
}

impl SockAddrBuf {
    /// Empty buffer sized to receive any address.
    pub fn new() -> Self {
        Self {
            storage: unsafe { mem::zeroed() },
            len: Self::capacity() as libc::socklen_t,
        }
    }

    #[inline]
    pub const fn capacity() -> usize {
        mem::size_of::<libc::sockaddr_storage>()
    }

    /// Address length in bytes. `0` when nothing was filled in.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn family(&self) -> libc::c_int {
        self.storage.ss_family as libc::c_int
    }

    /// Reset the length to full capacity before handing the buffer to the
    /// kernel as an output parameter.
    #[inline]
    pub(crate) fn reset_len(&mut self) {
        self.len = Self::capacity() as libc::socklen_t;
    }

    #[inline]
    pub(crate) fn set_len(&mut self, len: libc::socklen_t) {
        self.len = len.min(Self::capacity() as libc::socklen_t);
    }

    #[inline]
    pub(crate) fn raw_len(&self) -> libc::socklen_t {
        self.len
    }

    #[inline]
    pub(crate) fn len_mut(&mut self) -> &mut libc::socklen_t {
        &mut self.len
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *const libc::sockaddr {
        &self.storage as *const libc::sockaddr_storage as *const libc::sockaddr
    }

    #[inline]
    pub(crate) fn as_mut_ptr(&mut self) -> *mut libc::sockaddr {
        &mut self.storage as *mut libc::sockaddr_storage as *mut libc::sockaddr
    }

    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        let mut buf = Self::new();
        match addr {
            SocketAddr::V4(v4) => {
                // Safety: sockaddr_storage is large enough and suitably aligned
                // for every concrete sockaddr type.
                let sin = unsafe { &mut *(buf.as_mut_ptr() as *mut libc::sockaddr_in) };
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
                buf.len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            }
            SocketAddr::V6(v6) => {
                let sin6 = unsafe { &mut *(buf.as_mut_ptr() as *mut libc::sockaddr_in6) };
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_flowinfo = v6.flowinfo();
                sin6.sin6_addr.s6_addr = v6.ip().octets();
                sin6.sin6_scope_id = v6.scope_id();
                buf.len = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
            }
        }
        buf
    }

    /// Decode an IPv4 or IPv6 address. `None` for other families or a
    /// truncated buffer.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self.family() {
            libc::AF_INET if self.len() >= mem::size_of::<libc::sockaddr_in>() => {
                let sin = unsafe { &*(self.as_ptr() as *const libc::sockaddr_in) };
                let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
                Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
            }
            libc::AF_INET6 if self.len() >= mem::size_of::<libc::sockaddr_in6>() => {
                let sin6 = unsafe { &*(self.as_ptr() as *const libc::sockaddr_in6) };
                Some(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                )))
            }
            _ => None,
        }
    }
}

impl Default for SockAddrBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl From<SocketAddr> for SockAddrBuf {
    fn from(addr: SocketAddr) -> Self {
        Self::from_socket_addr(&addr)
    }
}

impl fmt::Debug for SockAddrBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_socket_addr() {
            Some(addr) => write!(f, "SockAddrBuf({})", addr),
            None => write!(f, "SockAddrBuf(family={}, len={})", self.family(), self.len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_conversion() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let buf = SockAddrBuf::from(addr);
        assert_eq!(buf.family(), libc::AF_INET);
        assert_eq!(buf.len(), mem::size_of::<libc::sockaddr_in>());
        assert_eq!(buf.to_socket_addr(), Some(addr));
    }

    #[test]
    fn test_ipv6_conversion() {
        let addr: SocketAddr = "[::1]:443".parse().unwrap();
        let buf = SockAddrBuf::from(addr);
        assert_eq!(buf.family(), libc::AF_INET6);
        assert_eq!(buf.to_socket_addr(), Some(addr));
        assert_eq!(format!("{:?}", buf), "SockAddrBuf([::1]:443)");
    }

    #[test]
    fn test_empty_and_truncated() {
        let mut buf = SockAddrBuf::new();
        assert_eq!(buf.len(), SockAddrBuf::capacity());
        assert_eq!(buf.to_socket_addr(), None);

        let mut v4 = SockAddrBuf::from("10.0.0.1:1".parse::<SocketAddr>().unwrap());
        v4.set_len(4);
        assert_eq!(v4.to_socket_addr(), None);

        buf.set_len(0);
        assert!(buf.is_empty());
    }
}
