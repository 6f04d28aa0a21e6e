//! Non-blocking TCP channel.
//!
//! A `TcpConn` is either a listener (meta channel, created by [`TcpConn::listen`])
//! or an established connection (created by [`TcpConn::accept`]). Everything is
//! non-blocking; would-block surfaces as `io::ErrorKind::WouldBlock` and the
//! reactor decides when to retry.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;

use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    Established,
    Eof,
}

#[derive(Debug)]
pub struct TcpConn {
    sd: RawFd,
    state: TcpState,
}

fn sockaddr_of(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe {
                *(&mut storage as *mut _ as *mut libc::sockaddr_in) = sin;
            }
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            unsafe {
                *(&mut storage as *mut _ as *mut libc::sockaddr_in6) = sin6;
            }
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

fn sockaddr_to_addr(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Some(SocketAddr::V4(SocketAddrV4::new(
                ip,
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

#[cfg(not(target_os = "linux"))]
fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn stream_socket(domain: libc::c_int) -> io::Result<RawFd> {
    let sd = unsafe {
        libc::socket(
            domain,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if sd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sd)
}

#[cfg(not(target_os = "linux"))]
fn stream_socket(domain: libc::c_int) -> io::Result<RawFd> {
    let sd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if sd < 0 {
        return Err(io::Error::last_os_error());
    }
    set_nonblocking_cloexec(sd)?;
    Ok(sd)
}

#[cfg(target_os = "linux")]
fn accept_raw(listener: RawFd) -> io::Result<RawFd> {
    let sd = unsafe {
        libc::accept4(
            listener,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };
    if sd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sd)
}

#[cfg(not(target_os = "linux"))]
fn accept_raw(listener: RawFd) -> io::Result<RawFd> {
    let sd = unsafe { libc::accept(listener, std::ptr::null_mut(), std::ptr::null_mut()) };
    if sd < 0 {
        return Err(io::Error::last_os_error());
    }
    set_nonblocking_cloexec(sd)?;
    Ok(sd)
}

fn set_tcp_nodelay(fd: RawFd) {
    let one: libc::c_int = 1;
    let status = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &one as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if status < 0 {
        warn!(
            "set TCP_NODELAY on fd {} failed, ignored: {}",
            fd,
            io::Error::last_os_error()
        );
    }
}

impl TcpConn {
    /// A placeholder with no descriptor, used by pooled buffered sockets
    /// between connections.
    pub fn detached() -> Self {
        TcpConn {
            sd: -1,
            state: TcpState::Closed,
        }
    }

    fn from_fd(sd: RawFd, state: TcpState) -> Self {
        TcpConn { sd, state }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.sd
    }

    #[inline]
    pub fn state(&self) -> TcpState {
        self.state
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.sd >= 0
    }

    /// Create a non-blocking listener bound to `addr`.
    pub fn listen(addr: &SocketAddr, backlog: i32) -> io::Result<TcpConn> {
        let domain = match addr {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };
        let sd = stream_socket(domain)?;
        let mut conn = TcpConn::from_fd(sd, TcpState::Closed);

        let one: libc::c_int = 1;
        let status = unsafe {
            libc::setsockopt(
                sd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if status < 0 {
            return Err(io::Error::last_os_error());
        }

        let (storage, len) = sockaddr_of(addr);
        let status = unsafe { libc::bind(sd, &storage as *const _ as *const libc::sockaddr, len) };
        if status < 0 {
            return Err(io::Error::last_os_error());
        }

        let status = unsafe { libc::listen(sd, backlog) };
        if status < 0 {
            return Err(io::Error::last_os_error());
        }

        conn.state = TcpState::Listen;
        info!("listening on {} with backlog {} (fd {})", addr, backlog, sd);
        Ok(conn)
    }

    /// Accept one pending connection; `Ok(None)` when none is pending.
    pub fn accept(&self) -> io::Result<Option<TcpConn>> {
        debug_assert_eq!(self.state, TcpState::Listen);
        loop {
            match accept_raw(self.sd) {
                Ok(sd) => {
                    set_tcp_nodelay(sd);
                    debug!("accepted connection fd {}", sd);
                    return Ok(Some(TcpConn::from_fd(sd, TcpState::Established)));
                }
                Err(err) => match err.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    Some(libc::EAGAIN) | Some(libc::ECONNABORTED) => return Ok(None),
                    _ => return Err(err),
                },
            }
        }
    }

    /// Accept and immediately close one pending connection.
    pub fn reject(&self) {
        if let Ok(Some(mut conn)) = self.accept() {
            conn.close();
        }
    }

    /// The locally bound address (useful when binding port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let status = unsafe {
            libc::getsockname(
                self.sd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if status < 0 {
            return Err(io::Error::last_os_error());
        }
        sockaddr_to_addr(&storage)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "unsupported address family"))
    }

    /// The remote peer's address.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let status = unsafe {
            libc::getpeername(
                self.sd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if status < 0 {
            return Err(io::Error::last_os_error());
        }
        sockaddr_to_addr(&storage)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "unsupported address family"))
    }

    /// Read into `buf`. `Ok(0)` means the peer closed.
    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = unsafe { libc::read(self.sd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n > 0 {
                return Ok(n as usize);
            }
            if n == 0 {
                self.state = TcpState::Eof;
                return Ok(0);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Write from `buf`; may write fewer bytes than given.
    pub fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let n = unsafe { libc::write(self.sd, buf.as_ptr() as *const libc::c_void, buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    pub fn close(&mut self) {
        if self.sd >= 0 {
            debug!("closing fd {}", self.sd);
            let status = unsafe { libc::close(self.sd) };
            if status < 0 {
                warn!(
                    "close fd {} failed, ignored: {}",
                    self.sd,
                    io::Error::last_os_error()
                );
            }
            self.sd = -1;
        }
        self.state = TcpState::Closed;
    }
}

impl Drop for TcpConn {
    fn drop(&mut self) {
        self.close();
    }
}
