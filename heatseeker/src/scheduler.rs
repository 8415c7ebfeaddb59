// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Cooperative, fixed-period scheduling of the tracker's three tasks.
//!
//! Every [`tick`][Scheduler::tick] runs each task that is due exactly once, always in the order
//! camera, control, trigger. A task never blocks: it either finishes its slice of work or yields
//! and picks up where it left off on its next period. Tasks talk to each other only through
//! [`Shared`], and a value published there is always complete.
use core::fmt;

use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::FaultKind;
use crate::frame::TemperatureFrame;
use crate::hotspot::Target;

/// The fixed set of tasks, in the order they run within a tick.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TaskId {
    /// Acquisition, conversion and hotspot location.
    Camera,

    /// Aiming.
    Control,

    /// Firing once locked on.
    Trigger,
}

impl TaskId {
    pub const ALL: [TaskId; 3] = [TaskId::Camera, TaskId::Control, TaskId::Trigger];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskId::Camera => "camera",
            TaskId::Control => "control",
            TaskId::Trigger => "trigger",
        };
        f.write_str(name)
    }
}

/// What a task did with its slice.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskStatus {
    /// The unit of work for this period is complete.
    Done,

    /// Waiting on something; resume next period.
    Yielded,
}

/// A fault recorded against a task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Fault {
    pub task: TaskId,
    pub kind: FaultKind,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {} task", self.kind, self.task)
    }
}

/// The whole tracker's operating mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Running,

    /// Outputs are held neutral and no task runs until
    /// [`clear_safe_hold`][Scheduler::clear_safe_hold] is called.
    SafeHold(Fault),
}

/// The latest complete value of something one task produces and others read.
///
/// Each publication replaces the previous value whole and bumps the sequence number.
#[derive(Clone, Debug, PartialEq)]
pub struct Share<T> {
    value: Option<T>,
    sequence: u32,
    published_at: u64,
}

impl<T> Default for Share<T> {
    fn default() -> Self {
        Self {
            value: None,
            sequence: 0,
            published_at: 0,
        }
    }
}

impl<T> Share<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, value: T, now_ms: u64) {
        self.value = Some(value);
        self.sequence = self.sequence.wrapping_add(1);
        self.published_at = now_ms;
    }

    pub fn latest(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// How many times a value has been published. 0 until the first one.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// When the latest value was published.
    pub fn published_at(&self) -> Option<u64> {
        self.value.as_ref().map(|_| self.published_at)
    }

    pub fn age_ms(&self, now_ms: u64) -> Option<u64> {
        self.published_at()
            .map(|published| now_ms.saturating_sub(published))
    }

    /// The latest value, unless it is older than `max_age_ms`.
    pub fn fresh(&self, now_ms: u64, max_age_ms: u64) -> Option<&T> {
        match self.age_ms(now_ms) {
            Some(age) if age <= max_age_ms => self.value.as_ref(),
            _ => None,
        }
    }
}

/// The duty cycles the control task last commanded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AimCommand {
    pub pan: f32,
    pub tilt: f32,

    /// Every axis is within the lock tolerance of a valid target.
    pub on_target: bool,
}

impl AimCommand {
    pub const NEUTRAL: AimCommand = AimCommand {
        pan: 0.0,
        tilt: 0.0,
        on_target: false,
    };
}

impl Default for AimCommand {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Everything the tasks exchange.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Shared {
    pub frame: Share<TemperatureFrame>,
    pub target: Share<Target>,
    pub command: Share<AimCommand>,
}

/// One resumable unit of the tracker.
pub trait Task {
    /// Do this period's work, or as much of it as is possible without waiting.
    fn step(&mut self, now_ms: u64, shared: &mut Shared) -> Result<TaskStatus, FaultKind>;

    /// Drop anything in progress and start over on the next step.
    fn restart(&mut self);

    /// Force any outputs to neutral.
    fn hold(&mut self) -> Result<(), FaultKind> {
        Ok(())
    }
}

/// Scheduler bookkeeping for one task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskSlot {
    id: TaskId,
    period_ms: u32,
    next_due_ms: u64,
    last_status: Option<TaskStatus>,
    last_fault: Option<Fault>,
    consecutive_faults: u16,
    runs: u32,
}

impl TaskSlot {
    fn new(id: TaskId, period_ms: u32, now_ms: u64) -> Self {
        Self {
            id,
            period_ms,
            next_due_ms: now_ms,
            last_status: None,
            last_fault: None,
            consecutive_faults: 0,
            runs: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    pub fn next_due_ms(&self) -> u64 {
        self.next_due_ms
    }

    pub fn last_status(&self) -> Option<TaskStatus> {
        self.last_status
    }

    /// The most recent fault, kept even after the task recovers.
    pub fn last_fault(&self) -> Option<Fault> {
        self.last_fault
    }

    pub fn consecutive_faults(&self) -> u16 {
        self.consecutive_faults
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    fn is_due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_due_ms
    }

    /// Missed periods are skipped rather than run back to back.
    fn schedule_next(&mut self, now_ms: u64) {
        let period = u64::from(self.period_ms);
        self.next_due_ms += period;
        if self.next_due_ms <= now_ms {
            self.next_due_ms = now_ms + period;
        }
    }
}

/// Runs the camera, control and trigger tasks on one core.
#[derive(Debug)]
pub struct Scheduler<Ca, Co, Tr, C> {
    camera: Ca,
    control: Co,
    trigger: Tr,
    clock: C,
    slots: [TaskSlot; 3],
    shared: Shared,
    mode: Mode,
    retry_limit: u16,
    tick_ms: u32,
}

impl<Ca, Co, Tr, C> Scheduler<Ca, Co, Tr, C>
where
    Ca: Task,
    Co: Task,
    Tr: Task,
    C: Clock,
{
    /// Every task is due on the first tick.
    pub fn new(camera: Ca, control: Co, trigger: Tr, clock: C, config: &SchedulerConfig) -> Self {
        let now = clock.now_ms();
        Self {
            camera,
            control,
            trigger,
            clock,
            slots: [
                TaskSlot::new(TaskId::Camera, config.camera_period_ms, now),
                TaskSlot::new(TaskId::Control, config.control_period_ms, now),
                TaskSlot::new(TaskId::Trigger, config.trigger_period_ms, now),
            ],
            shared: Shared::default(),
            mode: Mode::Running,
            retry_limit: config.retry_limit,
            tick_ms: config.tick_ms,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn slot(&self, id: TaskId) -> &TaskSlot {
        &self.slots[id.index()]
    }

    pub fn slots(&self) -> &[TaskSlot] {
        &self.slots
    }

    pub fn shared(&self) -> &Shared {
        &self.shared
    }

    pub fn tick_ms(&self) -> u32 {
        self.tick_ms
    }

    pub fn camera(&self) -> &Ca {
        &self.camera
    }

    pub fn control(&self) -> &Co {
        &self.control
    }

    pub fn trigger(&self) -> &Tr {
        &self.trigger
    }

    /// Run every task that is due, in order, and return the resulting mode.
    ///
    /// While holding safe, only the neutral outputs are refreshed.
    pub fn tick(&mut self) -> Mode {
        let now = self.clock.now_ms();
        let was_holding = matches!(self.mode, Mode::SafeHold(_));
        for id in TaskId::ALL {
            if !self.slots[id.index()].is_due(now) {
                continue;
            }
            match self.mode {
                Mode::Running => self.run_task(id, now),
                // Entering safe-hold already held the outputs for this tick
                Mode::SafeHold(_) if was_holding && id == TaskId::Control => {
                    self.hold_outputs(now)
                }
                Mode::SafeHold(_) => {}
            }
            self.slots[id.index()].schedule_next(now);
        }
        self.mode
    }

    /// Leave safe-hold and start every task over.
    ///
    /// Returns `false` if the tracker was not holding.
    pub fn clear_safe_hold(&mut self) -> bool {
        let fault = match self.mode {
            Mode::SafeHold(fault) => fault,
            Mode::Running => return false,
        };
        info!(task = %fault.task, fault = %fault.kind, "clearing safe-hold");
        self.mode = Mode::Running;
        for slot in self.slots.iter_mut() {
            slot.consecutive_faults = 0;
        }
        self.camera.restart();
        self.control.restart();
        self.trigger.restart();
        true
    }

    /// Repeatedly tick until `stop` says otherwise, sleeping one tick period in between.
    #[cfg(feature = "std")]
    pub fn run_until<F>(&mut self, mut stop: F)
    where
        F: FnMut(&Self) -> bool,
    {
        let pause = std::time::Duration::from_millis(u64::from(self.tick_ms));
        while !stop(self) {
            self.tick();
            std::thread::sleep(pause);
        }
    }

    fn run_task(&mut self, id: TaskId, now: u64) {
        let shared = &mut self.shared;
        let result = match id {
            TaskId::Camera => self.camera.step(now, shared),
            TaskId::Control => self.control.step(now, shared),
            TaskId::Trigger => self.trigger.step(now, shared),
        };
        let slot = &mut self.slots[id.index()];
        slot.runs = slot.runs.wrapping_add(1);
        let kind = match result {
            Ok(status) => {
                slot.last_status = Some(status);
                slot.consecutive_faults = 0;
                return;
            }
            Err(kind) => kind,
        };
        let fault = Fault { task: id, kind };
        slot.last_fault = Some(fault);
        slot.consecutive_faults = slot.consecutive_faults.saturating_add(1);
        let attempts = slot.consecutive_faults;
        if !kind.is_transient() || attempts > self.retry_limit {
            error!(
                task = %id,
                fault = %kind,
                consecutive = attempts,
                "entering safe-hold"
            );
            self.mode = Mode::SafeHold(fault);
            self.hold_outputs(now);
        } else {
            warn!(
                task = %id,
                fault = %kind,
                attempt = attempts,
                limit = self.retry_limit,
                "task fault, retrying"
            );
            match id {
                TaskId::Camera => self.camera.restart(),
                TaskId::Control => self.control.restart(),
                TaskId::Trigger => self.trigger.restart(),
            }
        }
    }

    fn hold_outputs(&mut self, now: u64) {
        let results = [
            (TaskId::Camera, self.camera.hold()),
            (TaskId::Control, self.control.hold()),
            (TaskId::Trigger, self.trigger.hold()),
        ];
        for (id, result) in results {
            if let Err(kind) = result {
                warn!(task = %id, fault = %kind, "unable to hold neutral");
            }
        }
        self.shared.command.publish(AimCommand::NEUTRAL, now);
    }
}

#[cfg(test)]
mod test {
    use heatseeker_test_data::ManualClock;
    use rstest::rstest;

    use super::*;
    use crate::hotspot::Hotspot;

    /// A task that fails on command and counts what was asked of it.
    #[derive(Debug, Default)]
    struct FakeTask {
        fail_with: Option<FaultKind>,
        steps: u32,
        restarts: u32,
        holds: u32,
        /// The shared target's sequence number as of the last step.
        seen_target: Option<u32>,
        publish_target: bool,
    }

    impl Task for FakeTask {
        fn step(&mut self, now_ms: u64, shared: &mut Shared) -> Result<TaskStatus, FaultKind> {
            self.steps += 1;
            self.seen_target = Some(shared.target.sequence());
            if let Some(kind) = self.fail_with {
                return Err(kind);
            }
            if self.publish_target {
                let hotspot = Hotspot {
                    row: 3,
                    column: 5,
                    temperature: 95.0,
                };
                shared.target.publish(Target::locked(hotspot), now_ms);
            }
            Ok(TaskStatus::Done)
        }

        fn restart(&mut self) {
            self.restarts += 1;
        }

        fn hold(&mut self) -> Result<(), FaultKind> {
            self.holds += 1;
            Ok(())
        }
    }

    type TestScheduler = Scheduler<FakeTask, FakeTask, FakeTask, ManualClockHandle>;

    #[derive(Clone, Debug)]
    struct ManualClockHandle(ManualClock);

    impl Clock for ManualClockHandle {
        fn now_ms(&self) -> u64 {
            self.0.now()
        }
    }

    fn config(retry_limit: u16) -> SchedulerConfig {
        SchedulerConfig {
            tick_ms: 5,
            camera_period_ms: 20,
            control_period_ms: 10,
            trigger_period_ms: 20,
            retry_limit,
            max_target_age_ms: 100,
        }
    }

    fn scheduler(camera: FakeTask, retry_limit: u16) -> (TestScheduler, ManualClock) {
        let time = ManualClock::new();
        let scheduler = Scheduler::new(
            camera,
            FakeTask::default(),
            FakeTask::default(),
            ManualClockHandle(time.clone()),
            &config(retry_limit),
        );
        (scheduler, time)
    }

    #[test]
    fn tasks_run_on_their_periods() {
        let (mut scheduler, time) = scheduler(FakeTask::default(), 3);
        for _ in 0..8 {
            assert_eq!(scheduler.tick(), Mode::Running);
            time.advance(5);
        }
        // 40 ms: camera and trigger at 0, 20; control at 0, 10, 20, 30
        assert_eq!(scheduler.camera().steps, 2);
        assert_eq!(scheduler.control().steps, 4);
        assert_eq!(scheduler.trigger().steps, 2);
        assert_eq!(scheduler.slot(TaskId::Control).runs(), 4);
        assert_eq!(scheduler.slot(TaskId::Camera).next_due_ms(), 40);
    }

    #[test]
    fn missed_periods_are_skipped() {
        let (mut scheduler, time) = scheduler(FakeTask::default(), 3);
        scheduler.tick();
        time.advance(95);
        scheduler.tick();
        assert_eq!(scheduler.control().steps, 2);
        assert_eq!(scheduler.slot(TaskId::Control).next_due_ms(), 105);
    }

    #[test]
    fn target_published_before_control_reads_it() {
        let camera = FakeTask {
            publish_target: true,
            ..FakeTask::default()
        };
        let (mut scheduler, _) = scheduler(camera, 3);
        scheduler.tick();
        // Control ran after camera in the same tick and saw the new target
        assert_eq!(scheduler.control().seen_target, Some(1));
        assert_eq!(
            scheduler.shared().target.latest().and_then(|t| t.location()),
            Some((3, 5))
        );
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(3)]
    fn transient_faults_escalate_after_retry_limit(#[case] retry_limit: u16) {
        let camera = FakeTask {
            fail_with: Some(FaultKind::CommunicationFault),
            ..FakeTask::default()
        };
        let (mut scheduler, time) = scheduler(camera, retry_limit);
        for attempt in 1..=retry_limit {
            assert_eq!(scheduler.tick(), Mode::Running, "attempt {}", attempt);
            assert_eq!(scheduler.slot(TaskId::Camera).consecutive_faults(), attempt);
            time.advance(20);
        }
        assert_eq!(scheduler.camera().restarts, u32::from(retry_limit));
        let fault = Fault {
            task: TaskId::Camera,
            kind: FaultKind::CommunicationFault,
        };
        assert_eq!(scheduler.tick(), Mode::SafeHold(fault));
        assert_eq!(scheduler.control().holds, 1);
        assert_eq!(
            scheduler.shared().command.latest(),
            Some(&AimCommand::NEUTRAL)
        );
    }

    #[test]
    fn persistent_fault_escalates_immediately() {
        let camera = FakeTask {
            fail_with: Some(FaultKind::AccessViolation),
            ..FakeTask::default()
        };
        let (mut scheduler, _) = scheduler(camera, 5);
        assert!(matches!(scheduler.tick(), Mode::SafeHold(_)));
        assert_eq!(scheduler.camera().restarts, 0);
        // Control never ran, the hold came first
        assert_eq!(scheduler.control().steps, 0);
    }

    #[test]
    fn recovery_resets_fault_count() {
        let camera = FakeTask {
            fail_with: Some(FaultKind::AcquisitionTimeout),
            ..FakeTask::default()
        };
        let (mut scheduler, time) = scheduler(camera, 2);
        scheduler.tick();
        time.advance(20);
        scheduler.tick();
        assert_eq!(scheduler.slot(TaskId::Camera).consecutive_faults(), 2);
        scheduler.camera.fail_with = None;
        time.advance(20);
        assert_eq!(scheduler.tick(), Mode::Running);
        assert_eq!(scheduler.slot(TaskId::Camera).consecutive_faults(), 0);
        assert_eq!(
            scheduler.slot(TaskId::Camera).last_fault().map(|f| f.kind),
            Some(FaultKind::AcquisitionTimeout)
        );
    }

    #[test]
    fn safe_hold_is_sticky_until_cleared() {
        let camera = FakeTask {
            fail_with: Some(FaultKind::CalibrationFormat),
            ..FakeTask::default()
        };
        let (mut scheduler, time) = scheduler(camera, 3);
        scheduler.tick();
        scheduler.camera.fail_with = None;
        for _ in 0..10 {
            time.advance(10);
            assert!(matches!(scheduler.tick(), Mode::SafeHold(_)));
        }
        // Only the holds keep coming
        assert_eq!(scheduler.camera().steps, 1);
        assert_eq!(scheduler.control().steps, 0);
        assert_eq!(scheduler.control().holds, 11);
        assert!(scheduler.clear_safe_hold());
        assert!(!scheduler.clear_safe_hold());
        assert_eq!(scheduler.control().restarts, 1);
        time.advance(20);
        assert_eq!(scheduler.tick(), Mode::Running);
        assert_eq!(scheduler.camera().steps, 2);
    }

    #[test]
    fn share_tracks_age() {
        let mut share = Share::new();
        assert_eq!(share.latest(), None);
        assert_eq!(share.age_ms(10), None);
        share.publish(7u8, 100);
        share.publish(8u8, 150);
        assert_eq!(share.sequence(), 2);
        assert_eq!(share.latest(), Some(&8));
        assert_eq!(share.age_ms(180), Some(30));
        assert_eq!(share.fresh(180, 30), Some(&8));
        assert_eq!(share.fresh(181, 30), None);
    }
}
