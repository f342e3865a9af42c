//! Deferred work owned by systems.
//!
//! A [`Task`] is stepped by the [`TimerQueue`] once its due time is reached
//! and returns whether it wants to run again. Every task belongs to the
//! system that scheduled it, so disabling that system cancels its pending
//! work with [`TimerQueue::cancel_owner`].
//!
//! [`EntityCursor`] is the one task shipped here: it drains an
//! [`EntityQueue`] one entity per step, spacing emissions by a fixed
//! interval.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use engine_component::{Entity, World};
use tracing::debug;

use crate::config::SystemUuid;

/// What a task wants after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run again after this delay.
    Continue(Duration),
    Done,
}

/// A resumable unit of deferred work.
pub trait Task {
    fn step(&mut self, world: &mut World) -> Step;
}

impl<F> Task for F
where
    F: FnMut(&mut World) -> Step,
{
    fn step(&mut self, world: &mut World) -> Step {
        self(world)
    }
}

struct Scheduled {
    due: Duration,
    seq: u64,
    owner: SystemUuid,
    task: Box<dyn Task>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed: `BinaryHeap` is a max-heap and the earliest task must pop
    // first. Equal due times run in scheduling order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Tasks ordered by due time on the runner's clock.
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
}

impl TimerQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` for `owner` at absolute time `due`.
    pub fn schedule(&mut self, owner: SystemUuid, due: Duration, task: Box<dyn Task>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled {
            due,
            seq,
            owner,
            task,
        });
    }

    /// Drop every pending task of `owner`. Returns how many were dropped.
    pub fn cancel_owner(&mut self, owner: &SystemUuid) -> usize {
        let before = self.heap.len();
        self.heap.retain(|scheduled| &scheduled.owner != owner);
        let cancelled = before - self.heap.len();
        if cancelled > 0 {
            debug!(system = %owner, cancelled, "timers cancelled");
        }
        cancelled
    }

    /// Step every task due at or before `now`. Continuations are queued
    /// relative to `now` and never run twice in one call.
    pub fn run_due(&mut self, now: Duration, world: &mut World) -> usize {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|next| next.due <= now) {
            if let Some(scheduled) = self.heap.pop() {
                due.push(scheduled);
            }
        }

        let count = due.len();
        for mut scheduled in due {
            match scheduled.task.step(world) {
                Step::Continue(delay) => {
                    scheduled.due = now + delay;
                    scheduled.seq = self.next_seq;
                    self.next_seq += 1;
                    self.heap.push(scheduled);
                }
                Step::Done => {}
            }
        }
        count
    }

    /// Due time of the earliest pending task.
    #[must_use]
    pub fn next_due(&self) -> Option<Duration> {
        self.heap.peek().map(|scheduled| scheduled.due)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("pending", &self.heap.len())
            .field("next_due", &self.next_due())
            .finish()
    }
}

/// Callback receiving each entity a cursor emits.
pub type EmitFn = Rc<RefCell<dyn FnMut(&mut World, Entity)>>;

/// A FIFO of entities waiting to be emitted, shared between a system and the
/// cursor draining it.
#[derive(Debug, Clone, Default)]
pub struct EntityQueue {
    entities: Rc<RefCell<VecDeque<Entity>>>,
    in_flight: Rc<Cell<bool>>,
}

impl EntityQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&self, entities: impl IntoIterator<Item = Entity>) {
        self.entities.borrow_mut().extend(entities);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.borrow().is_empty()
    }

    /// Returns `true` while a cursor is draining this queue.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.get()
    }

    /// Emit the next entity right away and return a cursor for the rest, to
    /// be scheduled `interval` from now. Returns `None` if the queue is empty
    /// or another cursor is already draining it.
    pub fn start(
        &self,
        world: &mut World,
        interval: Duration,
        emit: &EmitFn,
    ) -> Option<EntityCursor> {
        if self.in_flight.get() {
            return None;
        }
        let first = self.entities.borrow_mut().pop_front()?;
        (*emit.borrow_mut())(world, first);
        self.in_flight.set(true);
        Some(EntityCursor {
            queue: self.clone(),
            interval,
            emit: emit.clone(),
            alive: None,
        })
    }

    /// Drop every pending entity. A cursor in flight finishes on its next
    /// step.
    pub fn clear(&self) {
        self.entities.borrow_mut().clear();
    }

    fn pop(&self) -> Option<Entity> {
        self.entities.borrow_mut().pop_front()
    }
}

/// Emits one queued entity per step, `interval` apart, until the queue is
/// empty for a whole interval.
pub struct EntityCursor {
    queue: EntityQueue,
    interval: Duration,
    emit: EmitFn,
    alive: Option<Box<dyn Fn(&World) -> bool>>,
}

impl EntityCursor {
    /// Stop and clear the queue as soon as `alive` returns `false`.
    #[must_use]
    pub fn while_alive(mut self, alive: impl Fn(&World) -> bool + 'static) -> Self {
        self.alive = Some(Box::new(alive));
        self
    }
}

impl Task for EntityCursor {
    fn step(&mut self, world: &mut World) -> Step {
        if let Some(alive) = &self.alive
            && !alive(world)
        {
            debug!(dropped = self.queue.len(), "entity cursor source gone");
            self.queue.clear();
            return Step::Done;
        }
        match self.queue.pop() {
            Some(entity) => {
                (*self.emit.borrow_mut())(world, entity);
                Step::Continue(self.interval)
            }
            None => Step::Done,
        }
    }
}

impl Drop for EntityCursor {
    // Runs on completion and on cancellation alike.
    fn drop(&mut self) {
        self.queue.in_flight.set(false);
    }
}
