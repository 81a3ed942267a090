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

//! Registered descriptors and their interest state
use crate::error::*;
use crate::poller::Shared;
use crate::wait::Waiter;
use crate::{lock, Event, Poll, Ready, Token};
use snafu::ResultExt;
use std::fmt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

/// Descriptor value of a control block that has been torn down
pub const CLOSED_FD: RawFd = -1;

/// What runs on the dispatch thread when a record for the descriptor arrives
pub(crate) enum Handler {
    /// caller supplied callback, the payload is captured by the closure
    Callback(Box<dyn Fn(RawFd, Ready) + Send + Sync>),
    /// rendezvous pair of a [`crate::WaitPollable`]
    Waiter(Arc<Waiter>),
}

/// The control block shared by the registry and the [`Pollable`] handle.
pub(crate) struct Control {
    token: Token,
    fd: AtomicI32,
    registered: AtomicBool,
    /// interest mask last applied to the kernel, empty after a oneshot arm
    events: Mutex<Ready>,
    handler: Handler,
}

impl Control {
    pub(crate) fn new(token: Token, fd: RawFd, handler: Handler) -> Control {
        Control {
            token,
            fd: AtomicI32::new(fd),
            registered: AtomicBool::new(true),
            events: Mutex::new(Ready::ERR | Ready::HUP),
            handler,
        }
    }

    pub(crate) fn token(&self) -> Token {
        self.token
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd.load(Ordering::SeqCst)
    }

    pub(crate) fn handler(&self) -> &Handler {
        &self.handler
    }

    pub(crate) fn interest(&self) -> Ready {
        *lock(&self.events)
    }

    pub(crate) fn want_events(&self, poll: &Poll, events: Ready, oneshot: bool) -> Result<()> {
        let mut want = events - Ready::ONESHOT;
        if want.is_empty() {
            want = Ready::ERR | Ready::HUP;
        }
        if oneshot {
            want |= Ready::ONESHOT;
        }

        let mut current = lock(&self.events);
        let fd = self.fd();
        if fd == CLOSED_FD {
            return Err(Error::Closed {});
        }

        if *current == want {
            return Ok(());
        }

        log::debug!("poller: want events: fd: {}, {}", fd, want);
        poll.reregister(fd, Event::new(want, self.token))?;

        *current = if oneshot { Ready::empty() } else { want };
        Ok(())
    }

    pub(crate) fn dispatch(&self, shared: &Shared, events: Ready) {
        let fd = self.fd();
        if fd == CLOSED_FD {
            return;
        }

        match &self.handler {
            Handler::Callback(f) => f(fd, events),
            Handler::Waiter(w) => w.wake(self, shared, fd, events),
        }
    }

    pub(crate) fn deregister(&self, shared: &Shared) -> Result<()> {
        let _current = lock(&self.events);
        self.deregister_locked(shared)
    }

    fn deregister_locked(&self, shared: &Shared) -> Result<()> {
        if !self.registered.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let fd = self.fd();
        log::debug!("poller: deregister: fd: {}, {:?}", fd, self.token);
        let res = shared.poll().unregister(fd);
        if let Err(e) = &res {
            log::warn!("poller: failed to unregister fd {}: {}", fd, e);
        }
        shared.release(self.token);
        res
    }

    pub(crate) fn close(&self, shared: &Shared) -> Result<()> {
        let mut current = lock(&self.events);
        let fd = self.fd();
        if fd == CLOSED_FD {
            return Ok(());
        }

        let res = self.deregister_locked(shared);
        self.fd.store(CLOSED_FD, Ordering::SeqCst);
        *current = Ready::empty();
        drop(current);

        let closed = nix::unistd::close(fd).context(NixSnafu);
        res.and(closed)
    }
}

/// A descriptor registered with a [`crate::Poller`].
///
/// The handle owns the descriptor: closing or dropping it removes the
/// descriptor from the poller and closes it.
pub struct Pollable {
    control: Arc<Control>,
    shared: Arc<Shared>,
}

impl Pollable {
    pub(crate) fn new(control: Arc<Control>, shared: Arc<Shared>) -> Pollable {
        Pollable { control, shared }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// the descriptor, [`CLOSED_FD`] once closed
    pub fn fd(&self) -> RawFd {
        self.control.fd()
    }

    /// the back-reference carried in the kernel records of this descriptor
    pub fn token(&self) -> Token {
        self.control.token()
    }

    /// the interest mask currently stored for the descriptor
    pub fn interest(&self) -> Ready {
        self.control.interest()
    }

    /// whether [`Pollable::close`] already ran
    pub fn is_closed(&self) -> bool {
        self.fd() == CLOSED_FD
    }

    /// Change the interest of the descriptor.
    ///
    /// An empty mask means error and hang up only. With `oneshot` the
    /// descriptor is disabled after one delivery and has to be armed again;
    /// without it delivery repeats on every cycle while the condition holds.
    /// Asking again for the mask already applied does not reach the kernel.
    pub fn want_events(&self, events: Ready, oneshot: bool) -> Result<()> {
        self.control
            .want_events(self.shared.poll(), events, oneshot)
    }

    /// Remove the descriptor from the poller without closing it.
    pub fn deregister(&self) -> Result<()> {
        self.control.deregister(&self.shared)
    }

    /// Deregister and close the descriptor. Calling it again does nothing.
    pub fn close(&self) -> Result<()> {
        self.control.close(&self.shared)
    }
}

impl Drop for Pollable {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("poller: failed to close pollable on drop: {}", e);
        }
    }
}

impl AsRawFd for Pollable {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}

impl fmt::Debug for Pollable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pollable")
            .field("fd", &self.fd())
            .field("token", &self.token())
            .field("interest", &self.interest())
            .finish()
    }
}
