// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! FIFO wait list of model names.
//!
//! Holds membership only; starting transfers is the manager's job.

use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
pub struct DownloadQueue {
    names: VecDeque<String>,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `name` unless it is already waiting. Returns true if added.
    pub fn enqueue(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.names.push_back(name.to_string());
        true
    }

    /// Remove and return the head.
    pub fn dequeue_next(&mut self) -> Option<String> {
        self.names.pop_front()
    }

    /// Remove every occurrence of `name`.
    pub fn remove(&mut self, name: &str) {
        self.names.retain(|n| n != name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }
}
