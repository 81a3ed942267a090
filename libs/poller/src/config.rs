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

//! Poller configuration, loaded from the environment and a toml file
#![allow(non_snake_case)]
use crate::error::*;
use confique::Config;
use snafu::ResultExt;

/// default location of the configuration file
pub const POLLER_CONFIG: &str = "/etc/poller/poller.toml";

/// records fetched per epoll_wait call unless configured otherwise
pub const DEFAULT_BATCH_SIZE: usize = 16;

const MAX_BATCH_SIZE: usize = 1024;

/// Poller configuration
#[derive(Config, Debug)]
pub struct PollerConfig {
    /// the [Poller] section
    #[config(nested)]
    pub Poller: SectionPoller,
}

/// The [Poller] section
#[derive(Config, Debug)]
pub struct SectionPoller {
    /// records fetched per epoll_wait call
    #[config(default = 16, env = "POLLER_BATCH_SIZE")]
    pub BatchSize: usize,
    /// name of the dispatch thread
    #[config(default = "poller", env = "POLLER_THREAD_NAME")]
    pub ThreadName: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            Poller: SectionPoller::default(),
        }
    }
}

impl Default for SectionPoller {
    fn default() -> Self {
        SectionPoller {
            BatchSize: DEFAULT_BATCH_SIZE,
            ThreadName: String::from("poller"),
        }
    }
}

impl PollerConfig {
    /// Load the configuration, falling back to the defaults when it can not be read.
    pub fn new(file: Option<&str>) -> PollerConfig {
        match PollerConfig::load(file.unwrap_or(POLLER_CONFIG)) {
            Ok(c) => c,
            Err(e) => {
                log::debug!("poller: using default configuration: {}", e);
                PollerConfig::default()
            }
        }
    }

    /// Load the configuration, the environment overriding `file`.
    pub fn load(file: &str) -> Result<PollerConfig> {
        PollerConfig::builder()
            .env()
            .file(file)
            .load()
            .context(ConfigSnafu)
    }

    /// the batch size, kept within what a single wait can sensibly return
    pub fn batch_size(&self) -> usize {
        self.Poller.BatchSize.clamp(1, MAX_BATCH_SIZE)
    }
}
