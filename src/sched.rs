//! Synthesized sched_switch timelines.
//!
//! Each policy is a lazy iterator over [`ScheduleEvent`]s on one CPU. Events are
//! one `period` apart starting at `start`, and the sequence ends before the first
//! timestamp that reaches `end`. Building the same schedule twice yields the same
//! events, and dropping the iterator is all it takes to stop early.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GenError;

/// A schedulable task, identified by its `(name, id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub id: i32,
}

impl Task {
    pub fn new(name: impl Into<String>, id: i32) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.id)
    }
}

/// Parses `NAME:ID`. The id follows the last colon so names may contain colons.
impl FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, id) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected NAME:ID, got {s:?}"))?;
        if name.is_empty() {
            return Err(format!("task name is empty in {s:?}"));
        }
        let id = id
            .parse::<i32>()
            .map_err(|e| format!("invalid task id in {s:?}: {e}"))?;
        Ok(Task::new(name, id))
    }
}

/// One context switch: `task_out` leaves `cpu_id` and `task_in` starts running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEvent {
    /// Milliseconds.
    pub timestamp: u64,
    pub cpu_id: u32,
    pub task_out: Task,
    pub task_in: Task,
}

/// Number of events left when the next one would be at `next` (None once
/// the timestamp overflowed).
fn remaining(next: Option<u64>, end: u64, period: u64) -> usize {
    match next {
        Some(ts) if ts < end => usize::try_from((end - ts).div_ceil(period)).unwrap_or(usize::MAX),
        _ => 0,
    }
}

fn check_period(start: u64, end: u64, period: u64) -> Result<(), GenError> {
    if period == 0 && start < end {
        return Err(GenError::ZeroPeriod);
    }
    Ok(())
}

/// Two tasks sharing a CPU 50/50, switching every `period`.
#[derive(Debug, Clone)]
pub struct PairSchedule {
    next_ts: Option<u64>,
    end: u64,
    cpu_id: u32,
    period: u64,
    task_a: Task,
    task_b: Task,
    a_running: bool,
}

impl Iterator for PairSchedule {
    type Item = ScheduleEvent;

    fn next(&mut self) -> Option<ScheduleEvent> {
        let ts = self.next_ts.filter(|&ts| ts < self.end)?;
        let (task_out, task_in) = if self.a_running {
            (self.task_a.clone(), self.task_b.clone())
        } else {
            (self.task_b.clone(), self.task_a.clone())
        };
        self.a_running = !self.a_running;
        self.next_ts = ts.checked_add(self.period);
        Some(ScheduleEvent {
            timestamp: ts,
            cpu_id: self.cpu_id,
            task_out,
            task_in,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = remaining(self.next_ts, self.end, self.period);
        (n, Some(n))
    }
}

/// Alternate `task_a` and `task_b` on `cpu_id` from `start` until `end`.
///
/// The first switch is from `task_a` to `task_b` at `start`, the next from
/// `task_b` back to `task_a` one `period` later, and so on.
pub fn synthesize_pair(
    start: u64,
    end: u64,
    cpu_id: u32,
    period: u64,
    task_a: Task,
    task_b: Task,
) -> Result<PairSchedule, GenError> {
    check_period(start, end, period)?;
    Ok(PairSchedule {
        next_ts: Some(start),
        end,
        cpu_id,
        period,
        task_a,
        task_b,
        a_running: true,
    })
}

/// Tasks taking turns on a CPU in list order, one `period` each.
#[derive(Debug, Clone)]
pub struct RoundRobinSchedule {
    next_ts: Option<u64>,
    end: u64,
    cpu_id: u32,
    period: u64,
    tasks: Vec<Task>,
    next_index: usize,
    current: Task,
}

impl Iterator for RoundRobinSchedule {
    type Item = ScheduleEvent;

    fn next(&mut self) -> Option<ScheduleEvent> {
        let ts = self.next_ts.filter(|&ts| ts < self.end)?;
        let task_in = self.tasks[self.next_index].clone();
        let task_out = std::mem::replace(&mut self.current, task_in.clone());
        self.next_index = (self.next_index + 1) % self.tasks.len();
        self.next_ts = ts.checked_add(self.period);
        Some(ScheduleEvent {
            timestamp: ts,
            cpu_id: self.cpu_id,
            task_out,
            task_in,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = remaining(self.next_ts, self.end, self.period);
        (n, Some(n))
    }
}

/// Cycle through `tasks` on `cpu_id` from `start` until `end`.
///
/// The task running before `start` is taken to be the last one in the list, so
/// the first event switches from it to the first task.
pub fn synthesize_round_robin(
    start: u64,
    end: u64,
    cpu_id: u32,
    period: u64,
    tasks: Vec<Task>,
) -> Result<RoundRobinSchedule, GenError> {
    let current = tasks.last().cloned().ok_or(GenError::EmptyTaskList)?;
    check_period(start, end, period)?;
    Ok(RoundRobinSchedule {
        next_ts: Some(start),
        end,
        cpu_id,
        period,
        tasks,
        next_index: 0,
        current,
    })
}

/// Scheduling policy for a synthesized timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulePolicy {
    /// Two tasks alternating every period.
    Pair,
    /// Any number of tasks taking turns in list order.
    RoundRobin,
}

impl FromStr for SchedulePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pair" => Ok(SchedulePolicy::Pair),
            "round-robin" | "rr" => Ok(SchedulePolicy::RoundRobin),
            _ => Err(format!("unknown schedule policy {s:?} (expected pair or round-robin)")),
        }
    }
}

/// Either policy's timeline behind one iterator type.
#[derive(Debug, Clone)]
pub enum Schedule {
    Pair(PairSchedule),
    RoundRobin(RoundRobinSchedule),
}

impl Schedule {
    /// Build the timeline for `policy`. The pair policy takes exactly two tasks.
    pub fn new(
        policy: SchedulePolicy,
        start: u64,
        end: u64,
        cpu_id: u32,
        period: u64,
        tasks: Vec<Task>,
    ) -> Result<Self, GenError> {
        match policy {
            SchedulePolicy::Pair => {
                let [task_a, task_b]: [Task; 2] = tasks
                    .try_into()
                    .map_err(|tasks: Vec<Task>| GenError::PairNeedsTwoTasks { got: tasks.len() })?;
                synthesize_pair(start, end, cpu_id, period, task_a, task_b).map(Schedule::Pair)
            }
            SchedulePolicy::RoundRobin => {
                synthesize_round_robin(start, end, cpu_id, period, tasks).map(Schedule::RoundRobin)
            }
        }
    }
}

impl Iterator for Schedule {
    type Item = ScheduleEvent;

    fn next(&mut self) -> Option<ScheduleEvent> {
        match self {
            Schedule::Pair(s) => s.next(),
            Schedule::RoundRobin(s) => s.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Schedule::Pair(s) => s.size_hint(),
            Schedule::RoundRobin(s) => s.size_hint(),
        }
    }
}
