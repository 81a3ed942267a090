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

//! Encapsulation of the epoll interface
//!
//! [`Poll`] is the platform poller contract used by the dispatch loop: add,
//! modify and remove interest, and block for a batch of event records.

use crate::Result;
use libc::epoll_event;
use std::os::unix::io::{AsRawFd, RawFd};
pub(crate) mod epoll;
pub mod event;

pub use event::{Event, Ready, Token};

#[cfg(target_os = "linux")]
use epoll::Epoll as Poller;

/// Encapsulation of the epoll interface
#[derive(Debug)]
pub(crate) struct Poll {
    poller: Poller,
}

impl Poll {
    /// create a new poller
    pub(crate) fn new() -> Result<Poll> {
        Ok(Poll {
            poller: Poller::new()?,
        })
    }

    /// wait for a batch of records, at most `events.capacity()` of them
    pub(crate) fn wait(&self, events: &mut Vec<epoll_event>, timeout: i32) -> Result<usize> {
        self.poller.wait(events, timeout)
    }

    /// register the descriptor to the poller
    pub(crate) fn register(&self, fd: RawFd, event: Event) -> Result<()> {
        self.poller.register(fd, event)
    }

    /// change the interest of a registered descriptor
    pub(crate) fn reregister(&self, fd: RawFd, event: Event) -> Result<()> {
        self.poller.reregister(fd, event)
    }

    /// unregister the descriptor from the poller
    pub(crate) fn unregister(&self, fd: RawFd) -> Result<()> {
        self.poller.unregister(fd)
    }

    /// interrupt a blocked wait
    pub(crate) fn wake(&self) -> Result<()> {
        self.poller.wake()
    }

    pub(crate) fn drain_wake(&self) {
        self.poller.drain_wake()
    }

    pub(crate) fn n_sources(&self) -> usize {
        self.poller.n_sources()
    }

    pub(crate) fn n_modified(&self) -> usize {
        self.poller.n_modified()
    }
}

impl AsRawFd for Poll {
    fn as_raw_fd(&self) -> RawFd {
        self.poller.as_raw_fd()
    }
}

#[cfg(test)]
mod test {
    use super::{Event, Poll, Ready, Token};
    use nix::unistd::{close, pipe, write};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn epoll_new() {
        let poll = Poll::new().unwrap();
        assert!(poll.as_raw_fd() > 0);
        assert_eq!(poll.n_sources(), 0);
    }

    #[test]
    fn epoll_add_mod_del() {
        let poll = Poll::new().unwrap();
        let (r, w) = pipe().unwrap();
        let token = Token::new(0, 0);

        poll.register(r, Event::new(Ready::ERR | Ready::HUP, token))
            .unwrap();
        assert_eq!(poll.n_sources(), 1);
        assert!(poll
            .register(r, Event::new(Ready::ERR | Ready::HUP, token))
            .is_err());

        let mut events = Vec::with_capacity(16);
        assert_eq!(poll.wait(&mut events, 0).unwrap(), 0);

        write(w, b"x").unwrap();
        poll.reregister(r, Event::new(Ready::IN, token)).unwrap();
        assert_eq!(poll.n_modified(), 1);
        assert_eq!(poll.wait(&mut events, 0).unwrap(), 1);
        let event = Event::from(events[0]);
        assert_eq!(event.token(), token);
        assert!(event.events().contains(Ready::IN));

        poll.unregister(r).unwrap();
        assert_eq!(poll.n_sources(), 0);
        assert_eq!(poll.wait(&mut events, 0).unwrap(), 0);

        close(r).unwrap();
        close(w).unwrap();
    }

    #[test]
    fn epoll_oneshot() {
        let poll = Poll::new().unwrap();
        let (r, w) = pipe().unwrap();
        let token = Token::new(1, 0);
        poll.register(r, Event::new(Ready::IN | Ready::ONESHOT, token))
            .unwrap();
        write(w, b"x").unwrap();

        let mut events = Vec::with_capacity(16);
        assert_eq!(poll.wait(&mut events, 0).unwrap(), 1);
        // still readable, but disarmed
        assert_eq!(poll.wait(&mut events, 0).unwrap(), 0);

        poll.reregister(r, Event::new(Ready::IN | Ready::ONESHOT, token))
            .unwrap();
        assert_eq!(poll.wait(&mut events, 0).unwrap(), 1);

        close(r).unwrap();
        close(w).unwrap();
    }

    #[test]
    fn epoll_wake() {
        let poll = Poll::new().unwrap();
        let mut events = Vec::with_capacity(4);
        poll.wake().unwrap();
        assert_eq!(poll.wait(&mut events, -1).unwrap(), 1);
        assert_eq!(Event::from(events[0]).token(), Token::WAKE);

        poll.drain_wake();
        assert_eq!(poll.wait(&mut events, 0).unwrap(), 0);
    }
}
