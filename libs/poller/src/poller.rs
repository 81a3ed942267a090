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

//! The poller and its dispatch thread
use crate::config::PollerConfig;
use crate::error::*;
use crate::fd_util::fd_nonblock;
use crate::pollable::{Control, Handler, Pollable};
use crate::registry::Registry;
use crate::wait::{Closure, WaitPollable};
use crate::{lock, Event, Poll, Ready, Token};
use snafu::ResultExt;
use std::os::unix::io::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// How the dispatch loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Aborted,
    Failed { ret: i32, errno: i32 },
    Panicked,
}

/// Counters of one poller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// descriptors currently registered
    pub sources: usize,
    /// interest changes that reached the kernel
    pub modifications: usize,
    /// records handed to a handler
    pub dispatched: usize,
}

/// State shared by the poller, its dispatch thread and every pollable.
pub(crate) struct Shared {
    poll: Poll,
    registry: Mutex<Registry>,
    abort: AtomicBool,
    dead: AtomicBool,
    exit: Mutex<Option<Exit>>,
    exited: Condvar,
    n_dispatched: AtomicUsize,
}

impl Shared {
    fn new() -> Result<Shared> {
        Ok(Shared {
            poll: Poll::new()?,
            registry: Mutex::new(Registry::new()),
            abort: AtomicBool::new(false),
            dead: AtomicBool::new(false),
            exit: Mutex::new(None),
            exited: Condvar::new(),
            n_dispatched: AtomicUsize::new(0),
        })
    }

    pub(crate) fn poll(&self) -> &Poll {
        &self.poll
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    fn register(self: &Arc<Self>, fd: RawFd, handler: Handler) -> Result<Pollable> {
        let mut registry = lock(&self.registry);
        let control = registry.insert_with(|token| Arc::new(Control::new(token, fd, handler)));
        let token = control.token();

        // the slot is filled before the kernel may report anything for it
        if let Err(e) = self
            .poll
            .register(fd, Event::new(Ready::ERR | Ready::HUP, token))
        {
            registry.remove(token);
            return Err(e);
        }
        drop(registry);

        log::debug!("poller: register: fd: {}, {:?}", fd, token);
        Ok(Pollable::new(control, self.clone()))
    }

    /// Give the slot back; records still queued for the token are dropped.
    pub(crate) fn release(&self, token: Token) {
        lock(&self.registry).remove(token);
    }

    fn dispatch(&self, event: Event) {
        if event.token() == Token::WAKE {
            self.poll.drain_wake();
            return;
        }

        let control = match lock(&self.registry).get(event.token()) {
            Some(c) => c,
            None => {
                log::debug!("poller: dropping stale record {:?}", event.token());
                return;
            }
        };

        self.n_dispatched.fetch_add(1, Ordering::Relaxed);
        control.dispatch(self, event.events());
    }

    fn run(&self, batch_size: usize) -> Exit {
        let mut events: Vec<libc::epoll_event> = Vec::with_capacity(batch_size);
        let mut next = 0;

        loop {
            if self.abort.load(Ordering::SeqCst) {
                return Exit::Aborted;
            }

            if next < events.len() {
                let event = Event::from(events[next]);
                next += 1;
                self.dispatch(event);
                continue;
            }

            next = 0;
            match self.poll.wait(&mut events, -1) {
                Ok(n) => log::trace!("poller: epoll_wait: {}", n),
                Err(e) if e.is_transient() => continue,
                Err(e) => {
                    log::error!("poller: dispatch loop terminated: {}", e);
                    let (ret, errno) = match e {
                        Error::Syscall { ret, errno, .. } => (ret, errno),
                        other => (-1, other.get_errno()),
                    };
                    return Exit::Failed { ret, errno };
                }
            }
        }
    }

    fn shutdown(&self, exit: Exit) {
        self.dead.store(true, Ordering::SeqCst);

        let controls = lock(&self.registry).controls();
        for control in controls {
            if let Handler::Waiter(w) = control.handler() {
                w.close(Closure::PollerDead);
            }
        }

        *lock(&self.exit) = Some(exit);
        self.exited.notify_all();
    }

    fn wait_exit(&self) -> Exit {
        let mut exit = lock(&self.exit);
        loop {
            if let Some(e) = *exit {
                return e;
            }
            exit = self
                .exited
                .wait(exit)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// A Poller provides readiness notification and reliable closing of
/// registered file descriptors.
///
/// Every poller runs one dispatch thread. Handlers are invoked inline on
/// that thread, so a handler that blocks delays delivery to every other
/// descriptor of the same poller.
pub struct Poller {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    /// create a poller with the default configuration
    pub fn new() -> Result<Poller> {
        Poller::with_config(&PollerConfig::default())
    }

    /// create a poller and start its dispatch thread
    pub fn with_config(config: &PollerConfig) -> Result<Poller> {
        let shared = Arc::new(Shared::new()?);
        let batch_size = config.batch_size();

        let runner = shared.clone();
        let thread = thread::Builder::new()
            .name(config.Poller.ThreadName.clone())
            .spawn(move || {
                let exit = panic::catch_unwind(AssertUnwindSafe(|| runner.run(batch_size)))
                    .unwrap_or(Exit::Panicked);
                runner.shutdown(exit);
            })
            .context(IoSnafu)?;

        Ok(Poller {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Register a descriptor whose readiness is reported to `handler`.
    ///
    /// The descriptor is put into non-blocking mode and owned by the
    /// returned [`Pollable`]. Only error and hang up are watched until
    /// [`Pollable::want_events`] asks for more. `handler` receives the
    /// descriptor, the delivered mask and `data` on the dispatch thread.
    pub fn register_handler<T, F>(&self, fd: RawFd, handler: F, data: T) -> Result<Pollable>
    where
        T: Send + Sync + 'static,
        F: Fn(RawFd, Ready, &T) + Send + Sync + 'static,
    {
        fd_nonblock(fd, true)?;
        let callback = move |fd: RawFd, events: Ready| handler(fd, events, &data);
        self.shared
            .register(fd, Handler::Callback(Box::new(callback)))
    }

    /// Register a descriptor for blocking reads and writes.
    ///
    /// The descriptor is put into non-blocking mode and owned by the
    /// returned [`WaitPollable`].
    pub fn register(&self, fd: RawFd) -> Result<WaitPollable> {
        fd_nonblock(fd, true)?;
        WaitPollable::new(|handler| self.shared.register(fd, handler))
    }

    /// Stop the dispatch loop. Every descriptor of the poller becomes unusable.
    pub fn abort(&self) -> Result<()> {
        self.shared.abort.store(true, Ordering::SeqCst);
        self.shared.poll.wake()
    }

    /// Block until the dispatch loop ended and report why.
    ///
    /// Returns `Ok(())` after [`Poller::abort`], the failing `epoll_wait`
    /// error otherwise.
    pub fn done(&self) -> Result<()> {
        let exit = self.shared.wait_exit();
        if let Some(thread) = lock(&self.thread).take() {
            if thread.join().is_err() {
                log::error!("poller: dispatch thread panicked");
            }
        }

        match exit {
            Exit::Aborted => Ok(()),
            Exit::Failed { ret, errno } => Err(Error::Syscall {
                syscall: "epoll_wait",
                ret,
                errno,
            }),
            Exit::Panicked => Err(Error::PollerDead {}),
        }
    }

    /// whether the dispatch loop has ended
    pub fn is_dead(&self) -> bool {
        self.shared.is_dead()
    }

    /// current counters
    pub fn stats(&self) -> Stats {
        Stats {
            sources: self.shared.poll.n_sources(),
            modifications: self.shared.poll.n_modified(),
            dispatched: self.shared.n_dispatched.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Err(e) = self.abort() {
            log::warn!("poller: failed to wake dispatch thread: {}", e);
            return;
        }

        if let Some(thread) = lock(&self.thread).take() {
            // a handler dropping the last poller handle must not join itself
            if thread.thread().id() != thread::current().id() && thread.join().is_err() {
                log::error!("poller: dispatch thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollerConfig;
    use nix::unistd::{close, dup2, pipe, write};
    use std::os::unix::io::AsRawFd;
    use std::time::{Duration, Instant};

    fn wait_until<F: Fn() -> bool>(f: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_abort_and_done() {
        let poller = Poller::new().unwrap();
        assert!(!poller.is_dead());
        poller.abort().unwrap();
        poller.done().unwrap();
        assert!(poller.is_dead());
        // a second call reports the same outcome
        poller.done().unwrap();
    }

    #[test]
    fn test_with_config_thread_name() {
        let mut config = PollerConfig::default();
        config.Poller.ThreadName = "poller-test".to_string();
        config.Poller.BatchSize = 1;
        let poller = Poller::with_config(&config).unwrap();

        let (r, w) = pipe().unwrap();
        let name = Arc::new(Mutex::new(None));
        let p = poller
            .register_handler(
                r,
                |_, _, name: &Arc<Mutex<Option<String>>>| {
                    *name.lock().unwrap() = thread::current().name().map(String::from);
                },
                name.clone(),
            )
            .unwrap();
        p.want_events(Ready::IN, true).unwrap();
        write(w, b"x").unwrap();

        assert!(wait_until(|| name.lock().unwrap().is_some()));
        assert_eq!(name.lock().unwrap().as_deref(), Some("poller-test"));

        p.close().unwrap();
        close(w).unwrap();
    }

    #[test]
    fn test_register_sets_nonblock() {
        let poller = Poller::new().unwrap();
        let (r, w) = pipe().unwrap();
        let p = poller.register_handler(r, |_, _, _| {}, ()).unwrap();

        let flags = nix::fcntl::fcntl(r, nix::fcntl::FcntlArg::F_GETFL).unwrap();
        assert_ne!(flags & libc::O_NONBLOCK, 0);

        p.close().unwrap();
        close(w).unwrap();
    }

    #[test]
    fn test_register_twice_fails() {
        let poller = Poller::new().unwrap();
        let (r, w) = pipe().unwrap();
        let p = poller.register_handler(r, |_, _, _| {}, ()).unwrap();

        match poller.register_handler(r, |_, _, _| {}, ()) {
            Err(Error::Syscall { errno, .. }) => assert_eq!(errno, libc::EEXIST),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(lock(&poller.shared.registry).controls().len(), 1);

        p.close().unwrap();
        close(w).unwrap();
    }

    #[test]
    fn test_register_invalid_fd() {
        let poller = Poller::new().unwrap();
        assert!(poller.register_handler(-1, |_, _, _| {}, ()).is_err());
        assert!(poller.register(-1).is_err());
        assert_eq!(lock(&poller.shared.registry).controls().len(), 0);
    }

    #[test]
    fn test_stale_record_is_not_dispatched() {
        let poller = Poller::new().unwrap();
        let (r, w) = pipe().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let p = poller
            .register_handler(
                r,
                |_, _, hits: &Arc<AtomicUsize>| {
                    hits.fetch_add(1, Ordering::SeqCst);
                },
                hits.clone(),
            )
            .unwrap();
        let token = p.token();
        p.close().unwrap();

        poller.shared.dispatch(Event::new(Ready::IN, token));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(poller.stats().dispatched, 0);

        close(w).unwrap();
    }

    #[test]
    fn test_fatal_wait_error() {
        let poller = Poller::new().unwrap();
        let (r, w) = pipe().unwrap();
        let reader = Arc::new(poller.register(r).unwrap());

        let blocked = reader.clone();
        let t = thread::spawn(move || {
            let mut buf = [0u8; 16];
            blocked.read(&mut buf)
        });
        thread::sleep(Duration::from_millis(100));

        // the next epoll_wait runs on a descriptor that is no epoll instance
        let (fake_r, fake_w) = pipe().unwrap();
        dup2(fake_r, poller.shared.poll.as_raw_fd()).unwrap();
        poller.shared.poll.wake().unwrap();

        match poller.done() {
            Err(Error::Syscall { syscall, errno, .. }) => {
                assert_eq!(syscall, "epoll_wait");
                assert_eq!(errno, libc::EINVAL);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(poller.is_dead());
        assert!(matches!(t.join().unwrap(), Err(Error::PollerDead {})));
        assert!(matches!(reader.wait_read(), Err(Error::PollerDead {})));

        // the epoll descriptor now refers to the pipe, deregistration fails
        assert!(reader.close().is_err());
        close(fake_r).unwrap();
        close(fake_w).unwrap();
        close(w).unwrap();
    }
}
