//! Process descriptor table and ready queue. A slot table plus a
//! single-runner scheduling seed, not a scheduler: `loader::execute_program`
//! runs one program to completion before looking at the queue again, so
//! `ready_queue` only ever holds programs that have not started yet. The
//! live-process pointer (`current`) changes on every `loader` call, never on
//! a timer tick - there is no preemption here to drive one.

use spin::Mutex;

pub const MAX_PROCESSES: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
    Ready,
    Running,
    Exited(i32),
}

#[derive(Clone, Copy, Debug)]
pub struct Process {
    pub id: u32,
    pub volume: u32,
    pub page_directory: u32,
    pub state: State,
}

struct Table {
    slots: [Option<Process>; MAX_PROCESSES],
    next_id: u32,
    /// FIFO of slot indices waiting to run, oldest at the front.
    queue: [Option<usize>; MAX_PROCESSES],
    queue_head: usize,
    queue_len: usize,
    current: Option<usize>,
}

impl Table {
    const fn new() -> Self {
        Table {
            slots: [None; MAX_PROCESSES],
            next_id: 1,
            queue: [None; MAX_PROCESSES],
            queue_head: 0,
            queue_len: 0,
            current: None,
        }
    }

    fn push_queue(&mut self, slot: usize) {
        let tail = (self.queue_head + self.queue_len) % MAX_PROCESSES;
        self.queue[tail] = Some(slot);
        self.queue_len += 1;
    }

    fn pop_queue(&mut self) -> Option<usize> {
        if self.queue_len == 0 {
            return None;
        }
        let slot = self.queue[self.queue_head].take();
        self.queue_head = (self.queue_head + 1) % MAX_PROCESSES;
        self.queue_len -= 1;
        slot
    }

    /// Allocate a process descriptor in `Ready` state and enqueue it.
    /// Returns `None` if the table is full.
    fn spawn(&mut self, volume: u32, page_directory: u32) -> Option<u32> {
        let slot = self.slots.iter().position(|p| p.is_none())?;
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.slots[slot] = Some(Process {
            id,
            volume,
            page_directory,
            state: State::Ready,
        });
        self.push_queue(slot);
        Some(id)
    }

    /// Pop the next ready process and mark it `Running`, displacing
    /// whatever was `current` (the single-runner model: there is never more
    /// than one).
    fn schedule_next(&mut self) -> Option<Process> {
        let slot = self.pop_queue()?;
        if let Some(p) = self.slots[slot].as_mut() {
            p.state = State::Running;
        }
        self.current = Some(slot);
        self.slots[slot]
    }

    /// Mark the current process exited with `code` and free its slot. The
    /// page directory and program frames are `loader`'s responsibility, not
    /// this table's - this only tracks the descriptor's lifecycle.
    fn exit_current(&mut self, code: i32) {
        if let Some(slot) = self.current.take() {
            if let Some(p) = self.slots[slot].as_mut() {
                p.state = State::Exited(code);
            }
            self.slots[slot] = None;
        }
    }

    fn current(&self) -> Option<Process> {
        self.current.and_then(|slot| self.slots[slot])
    }
}

static TABLE: Mutex<Table> = Mutex::new(Table::new());

pub fn spawn(volume: u32, page_directory: u32) -> Option<u32> {
    TABLE.lock().spawn(volume, page_directory)
}

pub fn schedule_next() -> Option<Process> {
    TABLE.lock().schedule_next()
}

pub fn exit_current(code: i32) {
    TABLE.lock().exit_current(code);
}

pub fn current() -> Option<Process> {
    TABLE.lock().current()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_assigns_increasing_ids() {
        let mut table = Table::new();
        let a = table.spawn(1, 0).unwrap();
        let b = table.spawn(1, 0).unwrap();
        assert!(b > a);
    }

    #[test]
    fn schedule_next_follows_fifo_order() {
        let mut table = Table::new();
        let a = table.spawn(1, 0).unwrap();
        let b = table.spawn(1, 0).unwrap();
        let first = table.schedule_next().unwrap();
        assert_eq!(first.id, a);
        table.exit_current(0);
        let second = table.schedule_next().unwrap();
        assert_eq!(second.id, b);
        table.exit_current(0);
    }

    #[test]
    fn exit_current_clears_current_and_slot() {
        let mut table = Table::new();
        table.spawn(1, 0).unwrap();
        table.schedule_next().unwrap();
        assert!(table.current().is_some());
        table.exit_current(7);
        assert!(table.current().is_none());
    }

    #[test]
    fn table_full_returns_none() {
        let mut table = Table::new();
        for _ in 0..MAX_PROCESSES {
            table.spawn(1, 0).unwrap();
        }
        assert!(table.spawn(1, 0).is_none());
    }
}
