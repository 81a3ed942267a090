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

//!
use crate::error::*;
use nix::fcntl::{FcntlArg, OFlag};
use snafu::ResultExt;
use std::os::unix::io::RawFd;

/// set or clear O_NONBLOCK on the descriptor
pub fn fd_nonblock(fd: RawFd, nonblock: bool) -> Result<()> {
    let flags = nix::fcntl::fcntl(fd, FcntlArg::F_GETFL).context(NixSnafu)?;
    let fd_flag = OFlag::from_bits_truncate(flags);

    let nflag = match nonblock {
        true => fd_flag | OFlag::O_NONBLOCK,
        false => fd_flag & !OFlag::O_NONBLOCK,
    };

    if nflag == fd_flag {
        return Ok(());
    }

    nix::fcntl::fcntl(fd, FcntlArg::F_SETFL(nflag)).context(NixSnafu)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{close, pipe};

    fn is_nonblock(fd: RawFd) -> bool {
        let flags = nix::fcntl::fcntl(fd, FcntlArg::F_GETFL).unwrap();
        OFlag::from_bits_truncate(flags).contains(OFlag::O_NONBLOCK)
    }

    #[test]
    fn test_fd_nonblock() {
        let (r, w) = pipe().unwrap();
        assert!(!is_nonblock(r));

        fd_nonblock(r, true).unwrap();
        assert!(is_nonblock(r));
        fd_nonblock(r, true).unwrap();
        assert!(is_nonblock(r));

        fd_nonblock(r, false).unwrap();
        assert!(!is_nonblock(r));

        close(r).unwrap();
        close(w).unwrap();
    }

    #[test]
    fn test_fd_nonblock_bad_fd() {
        assert!(matches!(
            fd_nonblock(-1, true),
            Err(Error::Nix {
                source: nix::errno::Errno::EBADF
            })
        ));
    }
}
