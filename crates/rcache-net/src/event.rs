//! Event reactor over the OS readiness mechanism.
//!
//! epoll on Linux, kqueue on the BSDs/macOS. The surface is deliberately
//! small: add a read or write interest under a `u64` token, delete an fd,
//! wait. `wait` invokes the callback once per ready fd with a bitmask of
//! [`EVENT_READ`] / [`EVENT_WRITE`] / [`EVENT_ERR`], returns `-1` on fatal
//! error, `0` on timeout and the event count otherwise. `EINTR` is retried
//! internally.

/// Channel is readable (or the peer half-closed).
pub const EVENT_READ: u32 = 0x01;
/// Channel is writable.
pub const EVENT_WRITE: u32 = 0x02;
/// Error or hangup on the channel.
pub const EVENT_ERR: u32 = 0x04;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub use self::epoll::EventBase;
    } else {
        pub use self::kqueue::EventBase;
    }
}

#[cfg(target_os = "linux")]
mod epoll {
    use std::io;
    use std::os::fd::RawFd;

    use log::{error, info, warn};

    use super::{EVENT_ERR, EVENT_READ, EVENT_WRITE};

    pub struct EventBase {
        ep: RawFd,
        events: Vec<libc::epoll_event>,
    }

    impl EventBase {
        /// `nevent` bounds how many readiness events one wait can deliver.
        pub fn new(nevent: usize) -> io::Result<Self> {
            assert!(nevent > 0);
            let ep = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
            if ep < 0 {
                return Err(io::Error::last_os_error());
            }
            info!("epoll fd {} with nevent {}", ep, nevent);
            Ok(EventBase {
                ep,
                events: vec![libc::epoll_event { events: 0, u64: 0 }; nevent],
            })
        }

        fn ctl(&self, op: libc::c_int, fd: RawFd, mask: u32, token: u64) -> io::Result<()> {
            let mut ev = libc::epoll_event {
                events: mask,
                u64: token,
            };
            let status = unsafe { libc::epoll_ctl(self.ep, op, fd, &mut ev) };
            if status < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        fn add(&self, fd: RawFd, mask: u32, token: u64) -> io::Result<()> {
            match self.ctl(libc::EPOLL_CTL_ADD, fd, mask, token) {
                Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                    // already registered: swap the interest mask instead
                    self.ctl(libc::EPOLL_CTL_MOD, fd, mask, token)
                }
                other => other,
            }
        }

        pub fn add_read(&self, fd: RawFd, token: u64) -> io::Result<()> {
            self.add(fd, (libc::EPOLLIN | libc::EPOLLRDHUP) as u32, token)
        }

        pub fn add_write(&self, fd: RawFd, token: u64) -> io::Result<()> {
            self.add(fd, libc::EPOLLOUT as u32, token)
        }

        pub fn del(&self, fd: RawFd) -> io::Result<()> {
            // event argument must be non-null for pre-2.6.9 kernels
            let mut ev = libc::epoll_event { events: 0, u64: 0 };
            let status = unsafe { libc::epoll_ctl(self.ep, libc::EPOLL_CTL_DEL, fd, &mut ev) };
            if status < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        /// Wait up to `timeout_ms` (`-1` blocks indefinitely) and deliver
        /// ready tokens through `cb`.
        pub fn wait(&mut self, timeout_ms: i32, mut cb: impl FnMut(u64, u32)) -> i32 {
            loop {
                let n = unsafe {
                    libc::epoll_wait(
                        self.ep,
                        self.events.as_mut_ptr(),
                        self.events.len() as i32,
                        timeout_ms,
                    )
                };

                if n > 0 {
                    for i in 0..n as usize {
                        let ev = self.events[i];
                        let mut triggered = 0u32;
                        if ev.events & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0 {
                            triggered |= EVENT_ERR;
                        }
                        if ev.events & (libc::EPOLLIN | libc::EPOLLRDHUP) as u32 != 0 {
                            triggered |= EVENT_READ;
                        }
                        if ev.events & libc::EPOLLOUT as u32 != 0 {
                            triggered |= EVENT_WRITE;
                        }
                        cb(ev.u64, triggered);
                    }
                    return n;
                }

                if n == 0 {
                    if timeout_ms == -1 {
                        error!("indefinite wait on epoll fd {} returned no events", self.ep);
                        return -1;
                    }
                    return 0;
                }

                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                error!("wait on epoll fd {} failed: {}", self.ep, err);
                return -1;
            }
        }
    }

    impl Drop for EventBase {
        fn drop(&mut self) {
            if self.ep >= 0 {
                let status = unsafe { libc::close(self.ep) };
                if status < 0 {
                    warn!(
                        "close epoll fd {} failed, ignored: {}",
                        self.ep,
                        io::Error::last_os_error()
                    );
                }
                self.ep = -1;
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod kqueue {
    use std::io;
    use std::os::fd::RawFd;
    use std::ptr;

    use log::{error, info, warn};

    use super::{EVENT_ERR, EVENT_READ, EVENT_WRITE};

    pub struct EventBase {
        kq: RawFd,
        events: Vec<libc::kevent>,
    }

    impl EventBase {
        pub fn new(nevent: usize) -> io::Result<Self> {
            assert!(nevent > 0);
            let kq = unsafe { libc::kqueue() };
            if kq < 0 {
                return Err(io::Error::last_os_error());
            }
            info!("kqueue fd {} with nevent {}", kq, nevent);
            let zero: libc::kevent = unsafe { std::mem::zeroed() };
            Ok(EventBase {
                kq,
                events: vec![zero; nevent],
            })
        }

        fn change(&self, fd: RawFd, filter: i16, flags: u16, token: u64) -> io::Result<()> {
            let mut kev: libc::kevent = unsafe { std::mem::zeroed() };
            kev.ident = fd as usize;
            kev.filter = filter;
            kev.flags = flags;
            kev.udata = token as *mut libc::c_void;
            let status =
                unsafe { libc::kevent(self.kq, &kev, 1, ptr::null_mut(), 0, ptr::null()) };
            if status < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub fn add_read(&self, fd: RawFd, token: u64) -> io::Result<()> {
            self.change(fd, libc::EVFILT_READ, libc::EV_ADD, token)?;
            // drop any lingering write interest from a retry cycle
            let _ = self.change(fd, libc::EVFILT_WRITE, libc::EV_DELETE, token);
            Ok(())
        }

        pub fn add_write(&self, fd: RawFd, token: u64) -> io::Result<()> {
            self.change(fd, libc::EVFILT_WRITE, libc::EV_ADD, token)
        }

        pub fn del(&self, fd: RawFd) -> io::Result<()> {
            let _ = self.change(fd, libc::EVFILT_READ, libc::EV_DELETE, 0);
            let _ = self.change(fd, libc::EVFILT_WRITE, libc::EV_DELETE, 0);
            Ok(())
        }

        pub fn wait(&mut self, timeout_ms: i32, mut cb: impl FnMut(u64, u32)) -> i32 {
            let ts = libc::timespec {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_nsec: ((timeout_ms % 1000) * 1_000_000) as libc::c_long,
            };
            let tp = if timeout_ms < 0 { ptr::null() } else { &ts };

            loop {
                let n = unsafe {
                    libc::kevent(
                        self.kq,
                        ptr::null(),
                        0,
                        self.events.as_mut_ptr(),
                        self.events.len() as i32,
                        tp,
                    )
                };

                if n > 0 {
                    for i in 0..n as usize {
                        let ev = self.events[i];
                        let mut triggered = 0u32;
                        if ev.flags & libc::EV_ERROR != 0 {
                            triggered |= EVENT_ERR;
                        }
                        if ev.filter == libc::EVFILT_READ {
                            triggered |= EVENT_READ;
                        }
                        if ev.filter == libc::EVFILT_WRITE {
                            triggered |= EVENT_WRITE;
                        }
                        cb(ev.udata as u64, triggered);
                    }
                    return n;
                }

                if n == 0 {
                    if timeout_ms == -1 {
                        error!("indefinite wait on kqueue {} returned no events", self.kq);
                        return -1;
                    }
                    return 0;
                }

                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                error!("wait on kqueue {} failed: {}", self.kq, err);
                return -1;
            }
        }
    }

    impl Drop for EventBase {
        fn drop(&mut self) {
            if self.kq >= 0 {
                let status = unsafe { libc::close(self.kq) };
                if status < 0 {
                    warn!(
                        "close kqueue {} failed, ignored: {}",
                        self.kq,
                        io::Error::last_os_error()
                    );
                }
                self.kq = -1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipe_pair;

    #[test]
    fn test_wait_timeout_returns_zero() {
        let mut evb = EventBase::new(16).unwrap();
        let n = evb.wait(10, |_, _| panic!("no events expected"));
        assert_eq!(n, 0);
    }

    #[test]
    fn test_pipe_read_event_fires() {
        let mut evb = EventBase::new(16).unwrap();
        let (rx, tx) = pipe_pair().unwrap();
        evb.add_read(rx.fd(), 7).unwrap();

        assert_eq!(tx.send(b"x").unwrap(), 1);

        let mut seen = Vec::new();
        let n = evb.wait(1000, |token, ev| seen.push((token, ev)));
        assert_eq!(n, 1);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 7);
        assert!(seen[0].1 & EVENT_READ != 0);
    }

    #[test]
    fn test_del_stops_delivery() {
        let mut evb = EventBase::new(16).unwrap();
        let (rx, tx) = pipe_pair().unwrap();
        evb.add_read(rx.fd(), 1).unwrap();
        tx.send(b"x").unwrap();
        evb.del(rx.fd()).unwrap();

        let n = evb.wait(10, |_, _| panic!("fd was deregistered"));
        assert_eq!(n, 0);
    }

    #[test]
    fn test_write_event_on_writable_pipe() {
        let mut evb = EventBase::new(16).unwrap();
        let (_rx, tx) = pipe_pair().unwrap();
        evb.add_write(tx.fd(), 9).unwrap();

        let mut seen = 0u32;
        let n = evb.wait(1000, |token, ev| {
            assert_eq!(token, 9);
            seen = ev;
        });
        assert_eq!(n, 1);
        assert!(seen & EVENT_WRITE != 0);
    }
}
