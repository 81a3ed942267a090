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

//! # Readiness notification and reliable closing of file descriptors over epoll
//!
//! A [`Poller`] owns one epoll instance and one dispatch thread. Descriptors
//! are registered either with a callback ([`Poller::register_handler`]) or
//! for blocking reads and writes ([`Poller::register`]).
//!
//! Registration starts level-triggered on error and hang up only; interest
//! in readable or writable is added with [`Pollable::want_events`], either
//! persistently or as a oneshot arm that has to be renewed after every
//! delivery.
//!
//! # Example:
//! ```rust,no_run
//! # use nix::unistd::pipe;
//! # use poller::Poller;
//! # use std::thread;
//! #
//! let poller = Poller::new().unwrap();
//! let (r, w) = pipe().unwrap();
//!
//! let reader = poller.register(r).unwrap();
//! let writer = poller.register(w).unwrap();
//!
//! let t = thread::spawn(move || {
//!     writer.write(b"hello").unwrap();
//! });
//!
//! /// Blocks until the writer thread delivered the bytes
//! let mut buf = [0u8; 5];
//! let n = reader.read(&mut buf).unwrap();
//! assert_eq!(&buf[..n], b"hello");
//! t.join().unwrap();
//!
//! reader.close().unwrap();
//! poller.abort().unwrap();
//! poller.done().unwrap();
//! ```
//!
pub mod config;
pub mod error;
pub mod fd_util;
pub mod poll;
pub mod pollable;
mod poller;
mod registry;
pub mod wait;

pub use crate::config::PollerConfig;
pub(crate) use crate::poll::Poll;
pub use crate::poll::{Event, Ready, Token};
pub use crate::pollable::{Pollable, CLOSED_FD};
pub use crate::poller::{Poller, Stats};
pub use crate::wait::WaitPollable;
pub use error::*;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, going on with the data when a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
