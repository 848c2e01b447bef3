//! Bounded FIFO queue of tasks waiting for a worker slot.

use std::collections::VecDeque;

use crate::task::Task;

use super::SubmitError;

#[derive(Debug)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
    /// `None` = unbounded
    capacity: Option<usize>,
}

impl TaskQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            tasks: VecDeque::new(),
            capacity,
        }
    }

    /// Append `task`, or reject it when the queue is full.
    pub fn push(&mut self, task: Task) -> Result<(), SubmitError> {
        if let Some(capacity) = self.capacity {
            if self.tasks.len() >= capacity {
                return Err(SubmitError::QueueFull { capacity });
            }
        }
        self.tasks.push_back(task);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task::new(id, "general", serde_json::json!({})).unwrap()
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = TaskQueue::new(None);
        queue.push(task("a")).unwrap();
        queue.push(task("b")).unwrap();
        assert_eq!(queue.pop().unwrap().id, "a");
        assert_eq!(queue.pop().unwrap().id, "b");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut queue = TaskQueue::new(Some(1));
        queue.push(task("a")).unwrap();
        assert!(matches!(
            queue.push(task("b")),
            Err(SubmitError::QueueFull { capacity: 1 })
        ));
        assert_eq!(queue.len(), 1);

        queue.pop();
        assert!(queue.is_empty());
        assert!(queue.push(task("b")).is_ok());
    }
}
