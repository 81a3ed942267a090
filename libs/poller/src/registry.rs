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

//! Slot arena mapping event record tokens to control blocks
use crate::pollable::Control;
use crate::Token;
use std::sync::Arc;

#[derive(Default)]
struct Slot {
    generation: u32,
    control: Option<Arc<Control>>,
}

#[derive(Default)]
pub(crate) struct Registry {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry::default()
    }

    /// Fill a vacant slot with the control block built for its token.
    pub(crate) fn insert_with<F>(&mut self, f: F) -> Arc<Control>
    where
        F: FnOnce(Token) -> Arc<Control>,
    {
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };

        let slot = &mut self.slots[index];
        let control = f(Token::new(index, slot.generation));
        slot.control = Some(control.clone());
        control
    }

    /// Resolve a token; stale tokens of released slots resolve to nothing.
    pub(crate) fn get(&self, token: Token) -> Option<Arc<Control>> {
        let slot = self.slots.get(token.index())?;
        if slot.generation != token.generation() {
            return None;
        }
        slot.control.clone()
    }

    pub(crate) fn remove(&mut self, token: Token) -> Option<Arc<Control>> {
        let slot = self.slots.get_mut(token.index())?;
        if slot.generation != token.generation() {
            return None;
        }

        let control = slot.control.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(token.index());
        Some(control)
    }

    pub(crate) fn controls(&self) -> Vec<Arc<Control>> {
        self.slots
            .iter()
            .filter_map(|slot| slot.control.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pollable::Handler;

    fn control(token: Token, fd: i32) -> Arc<Control> {
        Arc::new(Control::new(token, fd, Handler::Callback(Box::new(|_, _| {}))))
    }

    #[test]
    fn test_insert_get_remove() {
        let mut registry = Registry::new();
        let a = registry.insert_with(|t| control(t, 10));
        let b = registry.insert_with(|t| control(t, 11));
        assert_eq!(registry.controls().len(), 2);
        assert_ne!(a.token(), b.token());

        assert_eq!(registry.get(a.token()).unwrap().fd(), 10);
        assert_eq!(registry.get(b.token()).unwrap().fd(), 11);

        assert!(registry.remove(a.token()).is_some());
        assert!(registry.remove(a.token()).is_none());
        assert!(registry.get(a.token()).is_none());
        assert_eq!(registry.controls().len(), 1);
    }

    #[test]
    fn test_stale_token_after_reuse() {
        let mut registry = Registry::new();
        let old = registry.insert_with(|t| control(t, 10)).token();
        registry.remove(old).unwrap();

        let new = registry.insert_with(|t| control(t, 12)).token();
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(registry.get(old).is_none());
        assert!(registry.remove(old).is_none());
        assert_eq!(registry.get(new).unwrap().fd(), 12);
    }

    #[test]
    fn test_unknown_token() {
        let registry = Registry::new();
        assert!(registry.get(Token::new(3, 0)).is_none());
        assert!(registry.get(Token::WAKE).is_none());
    }
}
