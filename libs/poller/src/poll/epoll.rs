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

use super::event::{Event, Ready, Token};
use crate::Result;
use libc::{epoll_event, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD};
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// syscall
#[macro_export]
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res < 0 {
            $crate::Result::Err($crate::Error::Syscall { syscall: stringify!($fn), errno: unsafe { *libc::__errno_location() }, ret: res as i32 })
        } else {
            $crate::Result::Ok(res)
        }
    }};
}

#[derive(Debug)]
pub(crate) struct Epoll {
    epoll_fd: RawFd,
    wake_fd: RawFd,
    n_sources: AtomicUsize,
    n_modified: AtomicUsize,
}

impl Epoll {
    pub(crate) fn new() -> Result<Epoll> {
        let mut epoll = syscall!(epoll_create1(EPOLL_CLOEXEC)).map(|ep| Epoll {
            epoll_fd: ep,
            wake_fd: -1,
            n_sources: AtomicUsize::new(0),
            n_modified: AtomicUsize::new(0),
        })?;

        // dropping `epoll` on the error paths closes what was opened so far
        epoll.wake_fd = syscall!(eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK))?;
        let mut event = Event::new(Ready::IN, Token::WAKE).to_raw();
        syscall!(epoll_ctl(
            epoll.epoll_fd,
            EPOLL_CTL_ADD,
            epoll.wake_fd,
            &mut event
        ))?;

        Ok(epoll)
    }

    pub(crate) fn wait(&self, events: &mut Vec<epoll_event>, timeout: i32) -> Result<usize> {
        events.clear();

        let n_ready = syscall!(epoll_wait(
            self.epoll_fd,
            events.as_mut_ptr(),
            events.capacity() as i32,
            timeout,
        ))?;

        unsafe {
            events.set_len(n_ready as usize);
        }

        Ok(n_ready as usize)
    }

    pub(crate) fn register(&self, fd: RawFd, event: Event) -> Result<()> {
        let mut event = event.to_raw();
        let res = syscall!(epoll_ctl(self.epoll_fd, EPOLL_CTL_ADD, fd, &mut event)).map(|_| ());
        if res.is_ok() {
            self.n_sources.fetch_add(1, Ordering::Relaxed);
        }
        res
    }

    pub(crate) fn reregister(&self, fd: RawFd, event: Event) -> Result<()> {
        let mut event = event.to_raw();
        let res = syscall!(epoll_ctl(self.epoll_fd, EPOLL_CTL_MOD, fd, &mut event)).map(|_| ());
        if res.is_ok() {
            self.n_modified.fetch_add(1, Ordering::Relaxed);
        }
        res
    }

    pub(crate) fn unregister(&self, fd: RawFd) -> Result<()> {
        let res =
            syscall!(epoll_ctl(self.epoll_fd, EPOLL_CTL_DEL, fd, ptr::null_mut())).map(|_| ());
        if res.is_ok() {
            self.n_sources.fetch_sub(1, Ordering::Relaxed);
        }
        res
    }

    /// make a blocked `wait` return
    pub(crate) fn wake(&self) -> Result<()> {
        let buf: u64 = 1;
        syscall!(write(
            self.wake_fd,
            &buf as *const u64 as *const libc::c_void,
            std::mem::size_of::<u64>()
        ))
        .map(|_| ())
    }

    pub(crate) fn drain_wake(&self) {
        let mut buf: u64 = 0;
        let _ = syscall!(read(
            self.wake_fd,
            &mut buf as *mut u64 as *mut libc::c_void,
            std::mem::size_of::<u64>()
        ));
    }

    pub(crate) fn n_sources(&self) -> usize {
        self.n_sources.load(Ordering::Relaxed)
    }

    pub(crate) fn n_modified(&self) -> usize {
        self.n_modified.load(Ordering::Relaxed)
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        if self.wake_fd >= 0 {
            let _ = syscall!(close(self.wake_fd));
        }
        let _ = syscall!(close(self.epoll_fd));
    }
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll_fd
    }
}
