//! Coroutine-aware socket API: every call here either returns immediately
//! or suspends the calling coroutine, never blocks the OS thread.
//!
//! Every socket handed out by [`socket`]/[`tcp_socket`]/[`udp_socket`] is
//! already non-blocking and close-on-exec; the functions below convert
//! `EWOULDBLOCK`/`EAGAIN` into an [`IoEvent`] suspension instead of
//! propagating it, so from a coroutine's point of view these behave like
//! blocking calls that happen to yield the thread to other coroutines
//! while waiting.

use crate::current;
use crate::demux::{Direction, RawFd};
use crate::error;
use crate::io_event::IoEvent;
use std::io;
use std::net::SocketAddr;

/// Which half of a full-duplex socket to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Read,
    Write,
    Both,
}

fn cvt(r: libc::c_int) -> io::Result<libc::c_int> {
    if r == -1 {
        Err(error::last_os_error())
    } else {
        Ok(r)
    }
}

fn would_block() -> bool {
    let e = io::Error::last_os_error();
    error::is_would_block(&e) || e.raw_os_error() == Some(libc::EAGAIN)
}

fn interrupted() -> bool {
    io::Error::last_os_error().kind() == io::ErrorKind::Interrupted
}

pub fn set_nonblock(fd: RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
}

fn set_cloexec(fd: RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
    }
}

/// Create a socket suitable for coroutine programming: non-blocking and
/// close-on-exec from the moment it is returned.
pub fn socket(domain: libc::c_int, ty: libc::c_int, protocol: libc::c_int) -> io::Result<RawFd> {
    #[cfg(target_os = "linux")]
    {
        let fd = unsafe { libc::socket(domain, ty | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC, protocol) };
        cvt(fd)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let fd = unsafe { libc::socket(domain, ty, protocol) };
        cvt(fd)?;
        set_nonblock(fd);
        set_cloexec(fd);
        Ok(fd)
    }
}

/// A non-blocking TCP socket. `domain`: `libc::AF_INET` or `libc::AF_INET6`.
pub fn tcp_socket(domain: libc::c_int) -> io::Result<RawFd> {
    socket(domain, libc::SOCK_STREAM, libc::IPPROTO_TCP)
}

/// A non-blocking UDP socket. `domain`: `libc::AF_INET` or `libc::AF_INET6`.
pub fn udp_socket(domain: libc::c_int) -> io::Result<RawFd> {
    socket(domain, libc::SOCK_DGRAM, libc::IPPROTO_UDP)
}

/// Close `fd`. If `ms > 0` and called from a coroutine, the close is
/// deferred by sleeping `ms` milliseconds first — gives a peer time to
/// drain a final write before the fd is torn down. Any pending I/O
/// registration on `fd` is removed first so waiters observe a clean
/// cancellation rather than the kernel silently dropping their interest.
pub fn close(fd: RawFd, ms: u32) -> io::Result<()> {
    if fd < 0 {
        return Ok(());
    }
    if let Some(yielder) = current::yielder() {
        yielder.del_io_event(fd, Direction::Read);
        yielder.del_io_event(fd, Direction::Write);
        if ms > 0 {
            crate::sleep(ms);
        }
    }
    cvt(unsafe { libc::close(fd) }).map(|_| ())
}

pub fn shutdown(fd: RawFd, how: Shutdown) -> io::Result<()> {
    if fd < 0 {
        return Ok(());
    }
    let (sys_how, dir) = match how {
        Shutdown::Read => (libc::SHUT_RD, Some(Direction::Read)),
        Shutdown::Write => (libc::SHUT_WR, Some(Direction::Write)),
        Shutdown::Both => (libc::SHUT_RDWR, None),
    };
    if let Some(yielder) = current::yielder() {
        match dir {
            Some(d) => yielder.del_io_event(fd, d),
            None => {
                yielder.del_io_event(fd, Direction::Read);
                yielder.del_io_event(fd, Direction::Write);
            }
        }
    }
    cvt(unsafe { libc::shutdown(fd, sys_how) }).map(|_| ())
}

pub fn bind(fd: RawFd, addr: SocketAddr) -> io::Result<()> {
    let (raw, len) = sockaddr_of(addr);
    cvt(unsafe { libc::bind(fd, &raw as *const _ as *const libc::sockaddr, len) }).map(|_| ())
}

pub fn listen(fd: RawFd, backlog: i32) -> io::Result<()> {
    cvt(unsafe { libc::listen(fd, backlog) }).map(|_| ())
}

/// Accept a connection, suspending the calling coroutine until one is
/// pending. The returned socket is already non-blocking and close-on-exec.
pub fn accept(fd: RawFd) -> io::Result<RawFd> {
    let mut ev = IoEvent::new(fd, Direction::Read);
    loop {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        #[cfg(target_os = "linux")]
        let connfd = unsafe {
            libc::accept4(
                fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        };
        #[cfg(not(target_os = "linux"))]
        let connfd = unsafe { libc::accept(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) };

        if connfd != -1 {
            #[cfg(not(target_os = "linux"))]
            {
                set_nonblock(connfd);
                set_cloexec(connfd);
            }
            return Ok(connfd);
        }

        if would_block() {
            ev.wait(None)?;
        } else if !interrupted() {
            return Err(error::last_os_error());
        }
    }
}

/// Connect, suspending until the connection completes, fails, or `ms`
/// milliseconds pass (`None`: no timeout).
pub fn connect(fd: RawFd, addr: SocketAddr, ms: Option<u32>) -> io::Result<()> {
    let (raw, len) = sockaddr_of(addr);
    loop {
        let r = unsafe { libc::connect(fd, &raw as *const _ as *const libc::sockaddr, len) };
        if r == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINPROGRESS) {
            let mut ev = IoEvent::new(fd, Direction::Write);
            ev.wait(ms)?;

            let mut sock_err: libc::c_int = 0;
            let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
            cvt(unsafe {
                libc::getsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_ERROR,
                    &mut sock_err as *mut _ as *mut libc::c_void,
                    &mut len,
                )
            })?;
            return if sock_err == 0 { Ok(()) } else { Err(io::Error::from_raw_os_error(sock_err)) };
        } else if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Receive up to `buf.len()` bytes, suspending on `EWOULDBLOCK`.
pub fn recv(fd: RawFd, buf: &mut [u8], ms: Option<u32>) -> io::Result<usize> {
    let mut ev = IoEvent::new(fd, Direction::Read);
    loop {
        let r = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        if r != -1 {
            return Ok(r as usize);
        }
        if would_block() {
            ev.wait(ms)?;
        } else if !interrupted() {
            return Err(error::last_os_error());
        }
    }
}

/// Receive exactly `buf.len()` bytes, or return early with the number of
/// bytes actually read on a peer close (`Ok(n) < buf.len()`).
pub fn recvn(fd: RawFd, buf: &mut [u8], ms: Option<u32>) -> io::Result<usize> {
    let mut ev = IoEvent::new(fd, Direction::Read);
    let n = buf.len();
    let mut read = 0;
    loop {
        if read == n {
            return Ok(n);
        }
        let r = unsafe { libc::recv(fd, buf[read..].as_mut_ptr() as *mut libc::c_void, n - read, 0) };
        match r {
            0 => return Ok(read),
            -1 => {
                if would_block() {
                    ev.wait(ms)?;
                } else if !interrupted() {
                    return Err(error::last_os_error());
                }
            }
            r => read += r as usize,
        }
    }
}

pub fn recvfrom(fd: RawFd, buf: &mut [u8], ms: Option<u32>) -> io::Result<(usize, SocketAddr)> {
    let mut ev = IoEvent::new(fd, Direction::Read);
    loop {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let r = unsafe {
            libc::recvfrom(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if r != -1 {
            return Ok((r as usize, sockaddr_to_std(&storage)?));
        }
        if would_block() {
            ev.wait(ms)?;
        } else if !interrupted() {
            return Err(error::last_os_error());
        }
    }
}

/// Send all of `buf`, suspending on `EWOULDBLOCK` between partial writes.
pub fn send(fd: RawFd, buf: &[u8], ms: Option<u32>) -> io::Result<usize> {
    let mut ev = IoEvent::new(fd, Direction::Write);
    let n = buf.len();
    let mut sent = 0;
    loop {
        if sent == n {
            return Ok(n);
        }
        let r = unsafe { libc::send(fd, buf[sent..].as_ptr() as *const libc::c_void, n - sent, 0) };
        if r == -1 {
            if would_block() {
                ev.wait(ms)?;
            } else if !interrupted() {
                return Err(error::last_os_error());
            }
        } else {
            sent += r as usize;
        }
    }
}

pub fn sendto(fd: RawFd, buf: &[u8], addr: SocketAddr, ms: Option<u32>) -> io::Result<usize> {
    let (raw, len) = sockaddr_of(addr);
    let mut ev = IoEvent::new(fd, Direction::Write);
    let n = buf.len();
    let mut sent = 0;
    loop {
        if sent == n {
            return Ok(n);
        }
        let r = unsafe {
            libc::sendto(
                fd,
                buf[sent..].as_ptr() as *const libc::c_void,
                n - sent,
                0,
                &raw as *const _ as *const libc::sockaddr,
                len,
            )
        };
        if r == -1 {
            if would_block() {
                ev.wait(ms)?;
            } else if !interrupted() {
                return Err(error::last_os_error());
            }
        } else {
            sent += r as usize;
        }
    }
}

fn setsockopt<T>(fd: RawFd, level: libc::c_int, opt: libc::c_int, val: T) {
    unsafe {
        libc::setsockopt(
            fd,
            level,
            opt,
            &val as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        );
    }
}

pub fn set_reuseaddr(fd: RawFd) {
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1i32);
}

/// Must be set before the socket connects.
pub fn set_send_buffer_size(fd: RawFd, n: i32) {
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, n);
}

/// Must be set before the socket connects.
pub fn set_recv_buffer_size(fd: RawFd, n: i32) {
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, n);
}

pub fn set_tcp_nodelay(fd: RawFd) {
    setsockopt(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1i32);
}

pub fn set_tcp_keepalive(fd: RawFd) {
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1i32);
}

/// Force an RST on close instead of the usual graceful FIN, `ms`
/// milliseconds later.
pub fn reset_tcp_socket(fd: RawFd, ms: u32) -> io::Result<()> {
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_LINGER, libc::linger { l_onoff: 1, l_linger: 0 });
    close(fd, ms)
}

fn sockaddr_of(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
            }
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
            }
            std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    };
    (storage, len)
}

fn sockaddr_to_std(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_ne_bytes(sin.sin_addr.s_addr.to_ne_bytes()));
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Ok(SocketAddr::V6(SocketAddrV6::new(ip, u16::from_be(sin6.sin6_port), sin6.sin6_flowinfo, sin6.sin6_scope_id)))
        }
        _ => Err(io::Error::new(io::ErrorKind::InvalidData, "unsupported address family")),
    }
}
