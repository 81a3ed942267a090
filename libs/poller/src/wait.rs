// Copyright (c) 2022 Huawei Technologies Co.,Ltd. All rights reserved.
//
// sysMaster is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Blocking reads and writes on top of readiness callbacks
//!
//! A [`WaitPollable`] installs a fixed handler that turns readiness records
//! into signals on two single-slot rendezvous points, one per direction.
//! At most one reader and one writer may block on a given `WaitPollable`
//! at a time; they may block concurrently.
use crate::error::*;
use crate::pollable::{Control, Handler, Pollable, CLOSED_FD};
use crate::poller::Shared;
use crate::{lock, Ready};
use nix::errno::Errno;
use std::fmt;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Why a rendezvous point stopped accepting signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Closure {
    Closed,
    PollerDead,
}

#[derive(Debug, Default)]
struct Slot {
    ready: bool,
    unexpected: Option<(RawFd, Ready)>,
    closed: Option<Closure>,
}

impl Slot {
    fn take(&mut self) -> Option<Result<()>> {
        match self.closed {
            Some(Closure::Closed) => return Some(Err(Error::Closed {})),
            Some(Closure::PollerDead) => return Some(Err(Error::PollerDead {})),
            None => {}
        }

        if self.ready {
            self.ready = false;
            return Some(Ok(()));
        }

        self.unexpected
            .take()
            .map(|(fd, events)| Err(Error::UnexpectedEvent { fd, events }))
    }
}

/// Single exchange point between the dispatch thread and one blocked caller.
///
/// Signals are not queued: readiness delivered while one is pending is
/// folded into it, and an unexpected-event error is kept beside it and
/// handed out on the following take.
#[derive(Debug, Default)]
pub(crate) struct Rendezvous {
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl Rendezvous {
    pub(crate) fn notify(&self) {
        lock(&self.slot).ready = true;
        self.cond.notify_one();
    }

    pub(crate) fn notify_unexpected(&self, fd: RawFd, events: Ready) {
        let mut slot = lock(&self.slot);
        let events = match slot.unexpected {
            Some((_, pending)) => pending | events,
            None => events,
        };
        slot.unexpected = Some((fd, events));
        drop(slot);
        self.cond.notify_one();
    }

    pub(crate) fn close(&self, why: Closure) {
        let mut slot = lock(&self.slot);
        if slot.closed.is_none() {
            slot.closed = Some(why);
        }
        drop(slot);
        self.cond.notify_all();
    }

    /// Block until a signal is pending and consume it.
    pub(crate) fn take(&self) -> Result<()> {
        let mut slot = lock(&self.slot);
        loop {
            if let Some(res) = slot.take() {
                return res;
            }
            slot = self
                .cond
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    #[cfg(test)]
    pub(crate) fn try_take(&self) -> Option<Result<()>> {
        lock(&self.slot).take()
    }
}

/// Handler state of a [`WaitPollable`], reachable from the dispatch thread.
#[derive(Debug, Default)]
pub(crate) struct Waiter {
    read: Rendezvous,
    write: Rendezvous,
    /// directions a caller is currently blocked on
    waiting: Mutex<Ready>,
}

impl Waiter {
    pub(crate) fn new() -> Waiter {
        Waiter::default()
    }

    fn rendezvous(&self, direction: Ready) -> &Rendezvous {
        if direction == Ready::OUT {
            &self.write
        } else {
            &self.read
        }
    }

    /// Hand the delivered bits out to the rendezvous points.
    ///
    /// Writable and readable are signalled first, whatever is left goes to
    /// the read side as an unexpected-event error. Returns the directions
    /// that received something.
    pub(crate) fn deliver(&self, fd: RawFd, events: Ready) -> Ready {
        let mut rest = events;
        let mut woke = Ready::empty();

        if rest.contains(Ready::OUT) {
            self.write.notify();
            rest.remove(Ready::OUT);
            woke |= Ready::OUT;
        }

        if rest.contains(Ready::IN) {
            self.read.notify();
            rest.remove(Ready::IN);
            woke |= Ready::IN;
        }

        if !rest.is_empty() {
            log::debug!("poller: unexpected event {} on fd {}", rest, fd);
            self.read.notify_unexpected(fd, rest);
            woke |= Ready::IN;
        }

        woke
    }

    /// Entry point on the dispatch thread.
    pub(crate) fn wake(&self, control: &Control, shared: &Shared, fd: RawFd, events: Ready) {
        let mut waiting = lock(&self.waiting);
        let mut woke = self.deliver(fd, events);

        // a blocked writer learns about the error from its next write(2)
        if waiting.contains(Ready::OUT)
            && !woke.contains(Ready::OUT)
            && events.intersects(Ready::ERR | Ready::HUP)
        {
            self.write.notify();
            woke |= Ready::OUT;
        }
        waiting.remove(woke);

        let res = if !waiting.is_empty() {
            // the oneshot arm is spent, keep watching for the other direction
            control.want_events(shared.poll(), *waiting, true)
        } else if !control.interest().is_empty() {
            // still on the level-triggered registration mask
            control.want_events(shared.poll(), Ready::empty(), true)
        } else {
            Ok(())
        };

        if let Err(e) = res {
            log::debug!("poller: failed to re-arm fd {}: {}", fd, e);
        }
    }

    pub(crate) fn close(&self, why: Closure) {
        self.read.close(why);
        self.write.close(why);
    }
}

/// A descriptor that can be read and written with blocking semantics.
///
/// Reads and writes first try the non-blocking syscall and only wait for
/// readiness when the kernel reports `EAGAIN`. There is no timeout; a
/// blocked caller returns when the descriptor becomes ready, when an error
/// or hang up is reported, when the `WaitPollable` is closed, or when the
/// poller stops.
pub struct WaitPollable {
    pollable: Pollable,
    waiter: Arc<Waiter>,
}

impl WaitPollable {
    pub(crate) fn new<F>(register: F) -> Result<WaitPollable>
    where
        F: FnOnce(Handler) -> Result<Pollable>,
    {
        let waiter = Arc::new(Waiter::new());
        let pollable = register(Handler::Waiter(waiter.clone()))?;
        Ok(WaitPollable { pollable, waiter })
    }

    /// the descriptor, [`CLOSED_FD`] once closed
    pub fn fd(&self) -> RawFd {
        self.pollable.fd()
    }

    /// the underlying registration
    pub fn pollable(&self) -> &Pollable {
        &self.pollable
    }

    /// Read up to `buf.len()` bytes.
    ///
    /// Blocks while there is nothing to read. End of stream is reported as
    /// [`Error::Eof`].
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let n = loop {
            let fd = self.fd();
            if fd == CLOSED_FD {
                return Err(Error::Closed {});
            }

            match nix::unistd::read(fd, buf) {
                Ok(n) => break n,
                Err(Errno::EAGAIN) => self.wait_read()?,
                Err(e) => return Err(Error::Nix { source: e }),
            }
        };

        if n == 0 && !buf.is_empty() {
            return Err(Error::Eof {});
        }
        Ok(n)
    }

    /// Write `buf`.
    ///
    /// Blocks while there is no buffer capacity. A write that transferred
    /// fewer bytes than requested is reported as [`Error::ShortWrite`].
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let n = loop {
            let fd = self.fd();
            if fd == CLOSED_FD {
                return Err(Error::Closed {});
            }

            match nix::unistd::write(fd, buf) {
                Ok(n) => break n,
                Err(Errno::EAGAIN) => self.wait_write()?,
                Err(e) => return Err(Error::Nix { source: e }),
            }
        };

        if n != buf.len() {
            return Err(Error::ShortWrite {
                written: n,
                expected: buf.len(),
            });
        }
        Ok(n)
    }

    /// Wait for the descriptor to become readable.
    pub fn wait_read(&self) -> Result<()> {
        self.wait(Ready::IN)
    }

    /// Wait for the descriptor to become writable.
    pub fn wait_write(&self) -> Result<()> {
        self.wait(Ready::OUT)
    }

    fn wait(&self, direction: Ready) -> Result<()> {
        if self.pollable.shared().is_dead() {
            return Err(Error::PollerDead {});
        }

        {
            let mut waiting = lock(&self.waiter.waiting);
            waiting.insert(direction);
            if let Err(e) = self.pollable.want_events(*waiting, true) {
                waiting.remove(direction);
                return Err(e);
            }
        }

        log::trace!("poller: fd {} waiting for {}", self.fd(), direction);
        self.waiter.rendezvous(direction).take()
    }

    /// Close the descriptor and wake blocked callers with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        let res = self.pollable.close();
        self.waiter.close(Closure::Closed);
        res
    }
}

impl AsRawFd for WaitPollable {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}

impl fmt::Debug for WaitPollable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitPollable")
            .field("pollable", &self.pollable)
            .finish()
    }
}

impl io::Read for &WaitPollable {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match WaitPollable::read(self, buf) {
            Err(Error::Eof {}) => Ok(0),
            res => res.map_err(io::Error::from),
        }
    }
}

impl io::Write for &WaitPollable {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match WaitPollable::write(self, buf) {
            Err(Error::ShortWrite { written, .. }) => Ok(written),
            res => res.map_err(io::Error::from),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for WaitPollable {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl io::Write for WaitPollable {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_readable_signals_read_only() {
        let waiter = Waiter::new();
        assert_eq!(waiter.deliver(7, Ready::IN), Ready::IN);

        assert!(matches!(waiter.read.try_take(), Some(Ok(()))));
        assert!(waiter.read.try_take().is_none());
        assert!(waiter.write.try_take().is_none());
    }

    #[test]
    fn test_writable_signals_write_only() {
        let waiter = Waiter::new();
        assert_eq!(waiter.deliver(7, Ready::OUT), Ready::OUT);

        assert!(matches!(waiter.write.try_take(), Some(Ok(()))));
        assert!(waiter.read.try_take().is_none());
    }

    #[test]
    fn test_hangup_with_readable() {
        let waiter = Waiter::new();
        waiter.deliver(7, Ready::HUP | Ready::IN);

        // recognized bits first, then the unexpected-bits error
        assert!(matches!(waiter.read.try_take(), Some(Ok(()))));
        match waiter.read.try_take() {
            Some(Err(Error::UnexpectedEvent { fd, events })) => {
                assert_eq!(fd, 7);
                assert_eq!(events, Ready::HUP);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(waiter.read.try_take().is_none());
        assert!(waiter.write.try_take().is_none());
    }

    #[test]
    fn test_unknown_bits_are_reported_raw() {
        let waiter = Waiter::new();
        let events = Ready::from_raw(libc::EPOLLRDHUP as u32) | Ready::ERR;
        waiter.deliver(9, events);

        match waiter.read.try_take() {
            Some(Err(Error::UnexpectedEvent { fd, events: got })) => {
                assert_eq!(fd, 9);
                assert_eq!(got, events);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_signals_coalesce() {
        let waiter = Waiter::new();
        waiter.deliver(7, Ready::IN);
        waiter.deliver(7, Ready::IN);

        assert!(matches!(waiter.read.try_take(), Some(Ok(()))));
        assert!(waiter.read.try_take().is_none());
    }

    #[test]
    fn test_take_blocks_until_notified() {
        let waiter = Arc::new(Waiter::new());
        let w = waiter.clone();
        let handle = thread::spawn(move || w.read.take());

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        waiter.deliver(7, Ready::IN);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_close_wakes_both_sides() {
        let waiter = Arc::new(Waiter::new());
        let r = waiter.clone();
        let w = waiter.clone();
        let reader = thread::spawn(move || r.read.take());
        let writer = thread::spawn(move || w.write.take());

        thread::sleep(Duration::from_millis(50));
        waiter.close(Closure::Closed);

        assert!(matches!(reader.join().unwrap(), Err(Error::Closed {})));
        assert!(matches!(writer.join().unwrap(), Err(Error::Closed {})));

        // closing is sticky and the first reason wins
        waiter.close(Closure::PollerDead);
        assert!(matches!(waiter.read.try_take(), Some(Err(Error::Closed {}))));
    }
}
