/*
 *  loop_cond.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Continuation predicates for the redraw loop
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

/// Asked once per loop iteration whether to keep going.
pub trait LoopCondition {
    fn cond(&mut self) -> bool;
}

/// Any `FnMut() -> bool` closure works as a condition.
impl<F: FnMut() -> bool> LoopCondition for F {
    fn cond(&mut self) -> bool {
        self()
    }
}

/// True for the first `limit` calls, false from then on.
#[derive(Debug, Clone)]
pub struct CondLimit {
    limit: usize,
    counter: usize,
}

impl CondLimit {
    pub fn new(limit: usize) -> Self {
        Self { limit, counter: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.counter)
    }
}

impl LoopCondition for CondLimit {
    fn cond(&mut self) -> bool {
        if self.counter >= self.limit {
            return false;
        }
        self.counter += 1;
        true
    }
}

/// Never stops; shutdown comes from the signal handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct CondInfinite;

impl LoopCondition for CondInfinite {
    fn cond(&mut self) -> bool {
        true
    }
}
