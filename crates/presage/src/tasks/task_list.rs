// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::ops::Bound;

use crate::tasks::{TaskPriority, TaskType};

/// A task waiting to run: the callable plus the classification the dispatcher schedules by.
pub(crate) struct TaskInfo {
    pub task: Box<dyn FnOnce() + Send>,
    pub task_type: TaskType,
    pub tag: i32,
    pub priority: TaskPriority,
}

impl fmt::Debug for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskInfo")
            .field("task_type", &self.task_type)
            .field("tag", &self.tag)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Priority-bucketed FIFO of pending tasks.
///
/// Iteration order is ascending priority key, then insertion order within a bucket. Used both
/// as the dispatcher's shared queue and as each worker's private inbox. Buckets are never left
/// empty in the map, so the first bucket always holds the next task to run.
#[derive(Debug, Default)]
pub(crate) struct TaskList {
    buckets: BTreeMap<u8, VecDeque<TaskInfo>>,
    len: usize,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: TaskInfo) {
        self.buckets
            .entry(task.priority.key())
            .or_default()
            .push_back(task);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Takes the highest-priority, oldest task.
    pub fn pop_front(&mut self) -> Option<TaskInfo> {
        let key = *self.buckets.keys().next()?;
        let bucket = self.buckets.get_mut(&key)?;
        let task = bucket.pop_front()?;
        if bucket.is_empty() {
            self.buckets.remove(&key);
        }
        self.len -= 1;
        Some(task)
    }

    /// A cursor positioned on the first task in priority-then-FIFO order.
    pub fn cursor(&mut self) -> TaskCursor<'_> {
        let first_key = self.buckets.keys().next().copied();
        TaskCursor {
            list: self,
            key: first_key,
            index: 0,
        }
    }
}

/// A mutable scan position inside a [`TaskList`].
///
/// Removing the current task lands the cursor on the next one, possibly in the next bucket;
/// the exclusive borrow of the list means no other view can be invalidated by the removal.
pub(crate) struct TaskCursor<'a> {
    list: &'a mut TaskList,
    key: Option<u8>,
    index: usize,
}

impl TaskCursor<'_> {
    pub fn current(&self) -> Option<&TaskInfo> {
        let key = self.key?;
        self.list.buckets.get(&key)?.get(self.index)
    }

    pub fn advance(&mut self) {
        let Some(key) = self.key else {
            return;
        };

        let bucket_len = self.list.buckets.get(&key).map_or(0, VecDeque::len);
        if self.index + 1 < bucket_len {
            self.index += 1;
        } else {
            self.key = self.key_after(key);
            self.index = 0;
        }
    }

    /// Removes and returns the current task; the cursor ends up on the element after it.
    pub fn take_current(&mut self) -> Option<TaskInfo> {
        let key = self.key?;
        let bucket = self.list.buckets.get_mut(&key)?;
        let task = bucket.remove(self.index)?;
        self.list.len -= 1;

        let remaining = bucket.len();
        if remaining == 0 {
            self.list.buckets.remove(&key);
        }
        if self.index >= remaining {
            self.key = self.key_after(key);
            self.index = 0;
        }

        Some(task)
    }

    fn key_after(&self, key: u8) -> Option<u8> {
        self.list
            .buckets
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(&next, _)| next)
    }
}

impl fmt::Debug for TaskCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCursor")
            .field("key", &self.key)
            .field("index", &self.index)
            .finish()
    }
}
