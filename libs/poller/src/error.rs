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

//! Error define
use crate::Ready;
use nix::errno::Errno;
use snafu::prelude::*;
use std::io::ErrorKind;
use std::os::unix::io::RawFd;

/// Poller Error
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Error(poller): Got an error: {:?}", source))]
    Io { source: std::io::Error },
    #[snafu(display("Error(poller): Nix error: {}", source))]
    Nix { source: nix::Error },
    #[snafu(display(
        "Error(poller): Got an error: (ret={}, errno={}) for syscall: {}",
        ret,
        errno,
        syscall
    ))]
    Syscall {
        syscall: &'static str,
        ret: i32,
        errno: i32,
    },
    #[snafu(display(
        "Error(poller): Unexpected event {} ({:#x}) on fd:{}",
        events,
        events.bits(),
        fd
    ))]
    UnexpectedEvent { fd: RawFd, events: Ready },
    #[snafu(display("Error(poller): short write, {} of {} bytes written.", written, expected))]
    ShortWrite { written: usize, expected: usize },
    #[snafu(display("Error(poller): end of stream."))]
    Eof {},
    #[snafu(display("Error(poller): pollable is closed."))]
    Closed {},
    #[snafu(display("Error(poller): dispatch loop is no longer running."))]
    PollerDead {},
    #[snafu(display("Error(poller): Config error: {}", source))]
    Config { source: confique::Error },
}

impl Error {
    /// Translate the poller error to error number.
    pub fn get_errno(&self) -> i32 {
        match self {
            Self::Io { source } => source.raw_os_error().unwrap_or(libc::EIO),
            Self::Nix { source } => *source as i32,
            Self::Syscall { errno, .. } => *errno,
            Self::UnexpectedEvent { .. } | Self::ShortWrite { .. } => libc::EIO,
            Self::Eof {} => 0,
            Self::Closed {} => libc::EBADF,
            Self::PollerDead {} => libc::ESHUTDOWN,
            Self::Config { .. } => libc::EINVAL,
        }
    }

    /// Whether the kernel asked us to simply try again.
    pub(crate) fn is_transient(&self) -> bool {
        let errno = match self {
            Self::Syscall { errno, .. } => *errno,
            Self::Nix { source } => *source as i32,
            _ => return false,
        };
        errno == Errno::EINTR as i32 || errno == Errno::EAGAIN as i32
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io { source } => source,
            Error::Nix { source } => std::io::Error::from_raw_os_error(source as i32),
            Error::Syscall { errno, .. } => std::io::Error::from_raw_os_error(errno),
            Error::Eof {} => std::io::Error::new(ErrorKind::UnexpectedEof, e.to_string()),
            Error::ShortWrite { .. } => std::io::Error::new(ErrorKind::WriteZero, e.to_string()),
            Error::Closed {} | Error::PollerDead {} => {
                std::io::Error::new(ErrorKind::NotConnected, e.to_string())
            }
            _ => std::io::Error::new(ErrorKind::Other, e.to_string()),
        }
    }
}

/// new Result
pub type Result<T, E = Error> = std::result::Result<T, E>;
