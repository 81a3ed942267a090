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

// Echo lines through a pipe: one thread writes, the main thread blocks on
// reads until the writer hangs up.
use nix::unistd::pipe;
use poller::{Error, Poller, PollerConfig};
use std::thread;
use std::time::Duration;

#[allow(missing_docs)]
fn main() {
    let config = PollerConfig::new(None);
    let poller = Poller::with_config(&config).unwrap();

    let (r, w) = pipe().unwrap();
    let reader = poller.register(r).unwrap();
    let writer = poller.register(w).unwrap();

    let t = thread::spawn(move || {
        for i in 0..3 {
            let line = format!("line {}\n", i);
            writer.write(line.as_bytes()).unwrap();
            thread::sleep(Duration::from_millis(100));
        }
        writer.close().unwrap();
    });

    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf) {
            Ok(n) => print!("{}", String::from_utf8_lossy(&buf[..n])),
            Err(Error::Eof {}) => break,
            Err(Error::UnexpectedEvent { events, .. }) => println!("peer gone: {}", events),
            Err(e) => panic!("read failed: {}", e),
        }
    }

    t.join().unwrap();
    println!("{:?}", poller.stats());
    poller.abort().unwrap();
    poller.done().unwrap();
}
