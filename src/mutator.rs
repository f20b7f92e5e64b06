//! Runtime modification engine
//!
//! ## Table of Contents
//! - **ScheduleState**: Idle → Due → Applied → Idle
//! - **ModificationSchedule**: Tracks when one modification last ran
//! - **PopulationMutator**: Applies due ADD / REMOVE / CHURN modifications
//! - **MutationReport**: Outcome of one tick
//!
//! Active members of a type always form one contiguous run of its member
//! list. ADD extends the run at its end, REMOVE shrinks it at its start and
//! CHURN does both, shifting the run forward. Every request is bounds-checked
//! before any flag changes, so a rejected modification leaves the type
//! untouched.

use crate::definition::{Definitions, ModificationKind, RuntimeModification};
use crate::error::{PopulationError, Result};
use crate::kind::MemberKind;
use crate::metrics::PopulationMetrics;
use crate::population::{Population, TypePopulation};
use crate::types::{ActiveWindow, ModificationId};
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Lifecycle of a scheduled modification within one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    /// Waiting for its next slot
    Idle,
    /// Slot reached, about to apply
    Due,
    /// Applied (or rejected) during the current tick
    Applied,
}

/// Scheduling state of one runtime modification
#[derive(Debug, Clone)]
pub struct ModificationSchedule {
    type_name: String,
    modification: RuntimeModification,
    state: ScheduleState,
    last_applied_minute: Option<u64>,
    applications: u64,
}

impl ModificationSchedule {
    /// Create an idle schedule
    pub fn new(type_name: impl Into<String>, modification: RuntimeModification) -> Self {
        Self {
            type_name: type_name.into(),
            modification,
            state: ScheduleState::Idle,
            last_applied_minute: None,
            applications: 0,
        }
    }

    /// Target type
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Scheduled modification
    pub fn modification(&self) -> &RuntimeModification {
        &self.modification
    }

    /// Current state
    pub fn state(&self) -> ScheduleState {
        self.state
    }

    /// Minute of the last application, if any
    pub fn last_applied_minute(&self) -> Option<u64> {
        self.last_applied_minute
    }

    /// Number of times the modification has run
    pub fn applications(&self) -> u64 {
        self.applications
    }

    /// Move to `Due` if the modification should run at `minute`
    pub fn poll(&mut self, minute: u64) -> bool {
        let m = &self.modification;
        let since = minute.saturating_sub(self.last_applied_minute.unwrap_or(0));
        let due = since >= m.frequency_minutes
            && minute > m.start_after_minutes
            && minute <= m.end_after_minutes
            && self.applications < m.max_applications();
        if due {
            self.state = ScheduleState::Due;
        }
        due
    }

    fn record(&mut self, minute: u64) {
        self.state = ScheduleState::Applied;
        self.last_applied_minute = Some(minute);
        self.applications += 1;
    }

    fn settle(&mut self) {
        self.state = ScheduleState::Idle;
    }
}

/// A modification applied during a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedModification {
    /// Modification id
    pub id: ModificationId,
    /// Target type
    pub type_name: String,
    /// Modification kind
    pub kind: ModificationKind,
    /// Members affected
    pub quantity: usize,
    /// Active window after the change
    pub window: ActiveWindow,
}

/// Outcome of one mutator tick
#[derive(Debug, Default)]
pub struct MutationReport {
    /// Elapsed whole minutes at the tick
    pub minute: u64,
    /// Modifications applied
    pub applied: Vec<AppliedModification>,
    /// Modifications rejected, with the reason
    pub rejected: Vec<(ModificationId, PopulationError)>,
}

impl MutationReport {
    /// True when nothing ran
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.rejected.is_empty()
    }
}

/// Applies scheduled modifications to a published population
pub struct PopulationMutator<K: MemberKind> {
    population: Arc<Population<K>>,
    schedules: Mutex<Vec<ModificationSchedule>>,
    minute: Duration,
    metrics: Option<Arc<PopulationMetrics>>,
}

impl<K: MemberKind> PopulationMutator<K> {
    /// Create a mutator with one schedule per runtime modification
    pub fn new(population: Arc<Population<K>>, definitions: &Definitions) -> Self {
        let schedules = definitions
            .iter()
            .flat_map(|d| {
                d.runtime_modifications
                    .iter()
                    .map(move |m| ModificationSchedule::new(d.name.clone(), m.clone()))
            })
            .collect();
        Self {
            population,
            schedules: Mutex::new(schedules),
            minute: Duration::from_secs(60),
            metrics: None,
        }
    }

    /// Length of one simulated minute
    pub fn with_minute_length(mut self, minute: Duration) -> Self {
        self.minute = minute.max(Duration::from_millis(1));
        self
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: Option<Arc<PopulationMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Population being mutated
    pub fn population(&self) -> &Arc<Population<K>> {
        &self.population
    }

    /// Copy of the current schedules
    pub fn schedules(&self) -> Vec<ModificationSchedule> {
        self.schedules.lock().clone()
    }

    /// Apply every modification that is due at `elapsed` since session start
    pub fn tick(&self, elapsed: Duration) -> MutationReport {
        let minute = (elapsed.as_millis() / self.minute.as_millis()) as u64;
        let mut report = MutationReport {
            minute,
            ..Default::default()
        };

        let mut schedules = self.schedules.lock();
        for schedule in schedules.iter_mut() {
            if !schedule.poll(minute) {
                continue;
            }
            let m = schedule.modification.clone();
            match self.apply(&schedule.type_name, m.kind, m.quantity) {
                Ok(window) => {
                    debug!(
                        kind = K::LABEL,
                        type_name = %schedule.type_name,
                        modification = %m.kind,
                        quantity = m.quantity,
                        window = %window,
                        minute = minute,
                        "Applied runtime modification"
                    );
                    report.applied.push(AppliedModification {
                        id: m.id,
                        type_name: schedule.type_name.clone(),
                        kind: m.kind,
                        quantity: m.quantity,
                        window,
                    });
                }
                Err(e) => {
                    warn!(
                        kind = K::LABEL,
                        type_name = %schedule.type_name,
                        modification = %m.kind,
                        id = %m.id,
                        error = %e,
                        "Runtime modification rejected"
                    );
                    report.rejected.push((m.id, e));
                }
            }
            schedule.record(minute);
            schedule.settle();
        }
        drop(schedules);

        if !report.applied.is_empty() {
            let version = self.population.bump_version();
            info!(
                kind = K::LABEL,
                applied = report.applied.len(),
                rejected = report.rejected.len(),
                version = version,
                "Mutation pass complete"
            );
        }
        report
    }

    /// Apply one change to a type immediately
    ///
    /// Changes to the same type are serialized; different types proceed
    /// independently.
    pub fn apply(&self, type_name: &str, kind: ModificationKind, quantity: usize) -> Result<ActiveWindow> {
        let members = self
            .population
            .get(type_name)
            .ok_or_else(|| PopulationError::mutation(format!("unknown type '{}'", type_name)))?;

        let result = {
            let _guard = members.lock_mutations();
            let result = match kind {
                ModificationKind::Add => add(members, quantity),
                ModificationKind::Remove => remove(members, quantity),
                ModificationKind::Churn => churn(members, quantity),
            };
            if let Ok(window) = result {
                members.publish_window(window);
            }
            result
        };

        if let Some(metrics) = &self.metrics {
            let label = kind.to_string();
            metrics.record_modification(K::LABEL, type_name, &label, result.as_ref().ok().map(ActiveWindow::len));
        }
        result
    }

    /// Run [`tick`](Self::tick) on a fixed interval until `shutdown` fires
    ///
    /// Elapsed time is read from the tokio clock, starting at `started`.
    pub fn spawn(
        self: Arc<Self>,
        started: Instant,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(kind = K::LABEL, interval_ms = interval.as_millis() as u64, "Population mutator started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick(started.elapsed());
                    }
                    _ = shutdown.recv() => {
                        info!(kind = K::LABEL, "Population mutator stopped");
                        break;
                    }
                }
            }
        })
    }
}

fn set_range(members: &TypePopulation, range: Range<usize>, active: bool) {
    for member in &members.members()[range] {
        member.set_active(active);
    }
}

fn add_range(members: &TypePopulation, quantity: usize) -> Result<Range<usize>> {
    let start = match members.last_active_index() {
        Some(last) => last + 1,
        None => members.window().end,
    };
    let end = start + quantity;
    if end > members.len() {
        return Err(PopulationError::mutation(format!(
            "ADD of {} to '{}' needs index {} but only {} members were allocated",
            quantity,
            members.name(),
            end - 1,
            members.len()
        )));
    }
    Ok(start..end)
}

fn remove_range(members: &TypePopulation, quantity: usize) -> Result<(Range<usize>, usize)> {
    let (first, last) = match (members.first_active_index(), members.last_active_index()) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return Err(PopulationError::mutation(format!(
                "REMOVE of {} from '{}': no active members",
                quantity,
                members.name()
            )))
        }
    };
    let active = last - first + 1;
    if quantity > active {
        return Err(PopulationError::mutation(format!(
            "REMOVE of {} from '{}' exceeds the {} active members",
            quantity,
            members.name(),
            active
        )));
    }
    Ok((first..first + quantity, last + 1))
}

fn add(members: &TypePopulation, quantity: usize) -> Result<ActiveWindow> {
    let range = add_range(members, quantity)?;
    let start = members.first_active_index().unwrap_or(range.start);
    let end = range.end;
    set_range(members, range, true);
    Ok(ActiveWindow::new(start, end))
}

fn remove(members: &TypePopulation, quantity: usize) -> Result<ActiveWindow> {
    let (range, end) = remove_range(members, quantity)?;
    let start = range.end;
    set_range(members, range, false);
    Ok(ActiveWindow::new(start, end))
}

fn churn(members: &TypePopulation, quantity: usize) -> Result<ActiveWindow> {
    let (removed, end) = remove_range(members, quantity)?;
    let added = end..end + quantity;
    if added.end > members.len() {
        return Err(PopulationError::mutation(format!(
            "CHURN of {} on '{}' would move past the {} allocated members",
            quantity,
            members.name(),
            members.len()
        )));
    }
    let window = ActiveWindow::new(removed.end, added.end);
    set_range(members, removed, false);
    set_range(members, added, true);
    Ok(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::TypeDefinition;
    use crate::kind::Entity;
    use crate::member::Member;

    fn population(name: &str, total: usize, active: usize) -> Arc<Population<Entity>> {
        let members = (0..total).map(|i| Member::new(name, i, i < active)).collect();
        let mut population = Population::new();
        population.insert_type(TypePopulation::new(name, members, active));
        Arc::new(population)
    }

    fn minutes(n: u64) -> Duration {
        Duration::from_secs(60 * n)
    }

    fn assert_window(population: &Population<Entity>, name: &str, expected: ActiveWindow) {
        let members = population.get(name).unwrap();
        assert_eq!(members.window(), expected);
        assert!(members.is_contiguous());
        for (i, member) in members.members().iter().enumerate() {
            assert_eq!(member.is_active(), expected.contains(i), "index {}", i);
        }
    }

    #[test]
    fn test_node_add_scenario() {
        let definition = TypeDefinition::new("node", 25)
            .with_attribute("name", "counter()")
            .with_modification(RuntimeModification::add(5, 2, 10));
        assert_eq!(definition.count_with_runtime_modifications(), 50);
        let definitions = Definitions::new(vec![definition]);

        let population = population("node", 50, 25);
        let mutator = PopulationMutator::new(population.clone(), &definitions);

        for minute in 0..=6 {
            mutator.tick(minutes(minute));
        }
        assert_eq!(mutator.schedules()[0].applications(), 3);
        assert_eq!(population.get("node").unwrap().active_count(), 40);
        assert_window(&population, "node", ActiveWindow::new(0, 40));

        for minute in 7..=30 {
            mutator.tick(minutes(minute));
        }
        assert_window(&population, "node", ActiveWindow::new(0, 50));
    }

    #[test]
    fn test_remove_from_window_start() {
        let population = population("machine", 10, 10);
        let definitions = Definitions::default();
        let mutator = PopulationMutator::new(population.clone(), &definitions);

        let window = mutator.apply("machine", ModificationKind::Remove, 2).unwrap();
        assert_eq!(window.len(), 8);
        assert_window(&population, "machine", ActiveWindow::new(2, 10));
        assert!(!population.members("machine")[0].is_active());
        assert!(!population.members("machine")[1].is_active());
    }

    #[test]
    fn test_churn_shifts_window() {
        let population = population("pod", 20, 10);
        let mutator = PopulationMutator::new(population.clone(), &Definitions::default());

        mutator.apply("pod", ModificationKind::Churn, 3).unwrap();
        assert_window(&population, "pod", ActiveWindow::new(3, 13));
        mutator.apply("pod", ModificationKind::Churn, 3).unwrap();
        assert_window(&population, "pod", ActiveWindow::new(6, 16));
        assert_eq!(population.get("pod").unwrap().active_count(), 10);
    }

    #[test]
    fn test_any_sequence_keeps_contiguity() {
        let population = population("disk", 40, 10);
        let mutator = PopulationMutator::new(population.clone(), &Definitions::default());
        let steps = [
            (ModificationKind::Add, 4),
            (ModificationKind::Remove, 3),
            (ModificationKind::Churn, 5),
            (ModificationKind::Remove, 11),
            (ModificationKind::Add, 2),
            (ModificationKind::Churn, 2),
            (ModificationKind::Add, 30),
            (ModificationKind::Remove, 99),
        ];
        for (kind, quantity) in steps {
            let _ = mutator.apply("disk", kind, quantity);
            let members = population.get("disk").unwrap();
            assert!(members.is_contiguous());
            let window = members.window();
            assert_eq!(members.active_members().len(), window.len());
            assert!(members.active_members().iter().all(Member::is_active));
        }
    }

    #[test]
    fn test_rejected_changes_leave_type_untouched() {
        let population = population("node", 12, 10);
        let mutator = PopulationMutator::new(population.clone(), &Definitions::default());

        assert!(mutator.apply("node", ModificationKind::Add, 3).is_err());
        assert!(mutator.apply("node", ModificationKind::Remove, 11).is_err());
        assert!(mutator.apply("node", ModificationKind::Churn, 3).is_err());
        assert!(mutator.apply("ghost", ModificationKind::Add, 1).is_err());
        assert_window(&population, "node", ActiveWindow::new(0, 10));

        mutator.apply("node", ModificationKind::Remove, 10).unwrap();
        assert_window(&population, "node", ActiveWindow::new(10, 10));
        assert!(mutator.apply("node", ModificationKind::Remove, 1).is_err());

        // with nothing active, ADD continues from the end of the last window
        mutator.apply("node", ModificationKind::Add, 2).unwrap();
        assert_window(&population, "node", ActiveWindow::new(10, 12));
    }

    #[test]
    fn test_schedule_window_and_cap() {
        let modification = RuntimeModification::add(1, 2, 10).starting_after(3);
        assert_eq!(modification.max_applications(), 3);
        let mut schedule = ModificationSchedule::new("node", modification);

        assert!(!schedule.poll(2));
        assert!(!schedule.poll(3));
        assert!(schedule.poll(4));
        assert_eq!(schedule.state(), ScheduleState::Due);
        schedule.record(4);
        assert_eq!(schedule.state(), ScheduleState::Applied);
        schedule.settle();
        assert_eq!(schedule.state(), ScheduleState::Idle);

        assert!(!schedule.poll(5));
        assert!(schedule.poll(6));
        schedule.record(6);
        assert!(schedule.poll(8));
        schedule.record(8);
        assert!(!schedule.poll(9));
        // minute 10 is inside the window but the cap is reached
        assert!(!schedule.poll(10));
        assert_eq!(schedule.applications(), 3);
        assert_eq!(schedule.last_applied_minute(), Some(8));
    }

    #[test]
    fn test_rejection_is_scoped_to_one_modification() {
        let definitions = Definitions::new(vec![
            TypeDefinition::new("node", 2)
                .with_attribute("a", "1")
                .with_modification(RuntimeModification::remove(2, 1, 5))
                .with_modification(RuntimeModification::remove(1, 1, 5)),
            TypeDefinition::new("pod", 2)
                .with_attribute("a", "1")
                .with_modification(RuntimeModification::add(1, 1, 5)),
        ]);
        let mut population = Population::<Entity>::new();
        population.insert_type(TypePopulation::new(
            "node",
            (0..2).map(|i| Member::new("node", i, true)).collect(),
            2,
        ));
        population.insert_type(TypePopulation::new(
            "pod",
            (0..7).map(|i| Member::new("pod", i, i < 2)).collect(),
            2,
        ));
        let population = Arc::new(population);
        let mutator = PopulationMutator::new(population.clone(), &definitions);

        let report = mutator.tick(minutes(1));
        assert_eq!(report.minute, 1);
        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(report.rejected[0].1, PopulationError::Mutation(_)));
        assert_eq!(population.get("pod").unwrap().active_count(), 3);
        assert_eq!(population.version(), 1);
    }

    #[test]
    fn test_minute_length() {
        let definitions = Definitions::new(vec![TypeDefinition::new("node", 1)
            .with_attribute("a", "1")
            .with_modification(RuntimeModification::add(1, 1, 3))]);
        let population = population("node", 4, 1);
        let mutator = PopulationMutator::new(population.clone(), &definitions)
            .with_minute_length(Duration::from_millis(10));

        assert!(mutator.tick(Duration::from_millis(5)).is_empty());
        assert_eq!(mutator.tick(Duration::from_millis(10)).applied.len(), 1);
        assert_eq!(population.get("node").unwrap().active_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_mutator_stops_on_shutdown() {
        let definitions = Definitions::new(vec![TypeDefinition::new("node", 1)
            .with_attribute("a", "1")
            .with_modification(RuntimeModification::add(1, 1, 1000))]);
        let population = population("node", 1001, 1);
        let mutator = Arc::new(
            PopulationMutator::new(population.clone(), &definitions).with_minute_length(Duration::from_millis(5)),
        );

        let (tx, rx) = broadcast::channel(1);
        let handle = mutator.spawn(Instant::now(), Duration::from_millis(5), rx);
        // the paused clock stops at each tick up to 95 ms, before the 100 ms tick
        tokio::time::sleep(Duration::from_millis(98)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        // one ADD per simulated minute, minutes 1 through 19
        let after_stop = population.get("node").unwrap().active_count();
        assert_eq!(after_stop, 20);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(population.get("node").unwrap().active_count(), after_stop);
        assert!(population.get("node").unwrap().is_contiguous());
    }

    #[test]
    fn test_concurrent_churn_with_readers() {
        const WRITERS: usize = 4;
        const CHURNS: usize = 1000;
        const ACTIVE: usize = 10;

        let population = population("node", ACTIVE + WRITERS * CHURNS, ACTIVE);
        let mutator = PopulationMutator::new(population.clone(), &Definitions::default());
        let done = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let members = population.get("node").unwrap();
                let mut reads = 0usize;
                while !done.load(std::sync::atomic::Ordering::Acquire) || reads == 0 {
                    let window = members.window();
                    assert_eq!(window.len(), ACTIVE);
                    assert!(window.end <= members.len());
                    assert_eq!(members.active_members().len(), ACTIVE);
                    // churn never reactivates a member once it left the window
                    if let Some(previous) = window.start.checked_sub(1).and_then(|i| members.member(i)) {
                        assert!(!previous.is_active());
                    }
                    reads += 1;
                }
                reads
            });

            let writers: Vec<_> = (0..WRITERS)
                .map(|_| {
                    scope.spawn(|| {
                        for _ in 0..CHURNS {
                            mutator.apply("node", ModificationKind::Churn, 1).unwrap();
                        }
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }
            done.store(true, std::sync::atomic::Ordering::Release);
            assert!(reader.join().unwrap() > 0);
        });

        let total = WRITERS * CHURNS;
        assert_window(&population, "node", ActiveWindow::new(total, total + ACTIVE));
        assert_eq!(population.get("node").unwrap().active_count(), ACTIVE);
    }
}
