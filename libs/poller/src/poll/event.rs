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

//! The event record exchanged with the kernel
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Interest and readiness bits of an epoll event record
    #[derive(Default)]
    pub struct Ready: u32 {
        /// readable
        const IN = libc::EPOLLIN as u32;
        /// writable
        const OUT = libc::EPOLLOUT as u32;
        /// error condition, always reported
        const ERR = libc::EPOLLERR as u32;
        /// hang up, always reported
        const HUP = libc::EPOLLHUP as u32;
        /// disable the descriptor after one delivery
        const ONESHOT = libc::EPOLLONESHOT as u32;
    }
}

impl Ready {
    /// Keep every bit the kernel delivered, including the ones without a name here.
    pub fn from_raw(bits: u32) -> Ready {
        unsafe { Ready::from_bits_unchecked(bits) }
    }
}

impl fmt::Display for Ready {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Ready, &str); 5] = [
            (Ready::ERR, "EPOLLERR"),
            (Ready::HUP, "EPOLLHUP"),
            (Ready::IN, "EPOLLIN"),
            (Ready::OUT, "EPOLLOUT"),
            (Ready::ONESHOT, "EPOLLONESHOT"),
        ];

        let mut names = Vec::new();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                names.push(name.to_string());
            }
        }

        let rest = self.bits() & !Ready::all().bits();
        if rest != 0 {
            names.push(format!("{:#x}", rest));
        }

        f.write_str(&names.join("|"))
    }
}

/// Back-reference carried in the data word of an epoll event record.
///
/// The low half is the slot index in the poller registry, the high half the
/// generation of that slot, so a record queued for a released slot never
/// resolves to the control block that reused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token(u64);

impl Token {
    /// reserved for the poller's own wake descriptor
    pub(crate) const WAKE: Token = Token(u64::MAX);

    pub(crate) fn new(index: usize, generation: u32) -> Token {
        Token(((generation as u64) << 32) | (index as u32 as u64))
    }

    pub(crate) fn index(self) -> usize {
        (self.0 & 0xffff_ffff) as usize
    }

    pub(crate) fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// the raw value stored in the kernel record
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// One record delivered by, or handed to, the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    events: Ready,
    token: Token,
}

impl Event {
    pub(crate) fn new(events: Ready, token: Token) -> Event {
        Event { events, token }
    }

    /// interest or readiness mask
    pub fn events(&self) -> Ready {
        self.events
    }

    /// back-reference to the registered control block
    pub fn token(&self) -> Token {
        self.token
    }

    pub(crate) fn to_raw(self) -> libc::epoll_event {
        libc::epoll_event {
            events: self.events.bits(),
            u64: self.token.0,
        }
    }
}

impl From<libc::epoll_event> for Event {
    fn from(ev: libc::epoll_event) -> Self {
        // copy out of the (possibly packed) kernel record before use
        let events = ev.events;
        let data = ev.u64;
        Event {
            events: Ready::from_raw(events),
            token: Token(data),
        }
    }
}
