//! Continuous and discrete events.
//!
//! A continuous event watches the sign of `g(t, u)` across each accepted
//! segment. The crossing time is located on the segment's dense output by a
//! bracketing root finder that always answers with a point on the post-crossing
//! side of the bracket, so restarting the integration there cannot detect the
//! same crossing again. A zero of `g` exactly at the start of a segment is not
//! a crossing: it was already seen as the end of the previous segment.
//! After an event fires, its sign on the next segment is taken a little way
//! past the restart point, so an effect that reverses the motion (a bounce)
//! does not bring the same root back.
//!
//! A discrete event is a predicate checked once per accepted step at its end.
//! When a continuous event cuts the step short, that end is the event time.
//!
//! Effects mutate the trajectory only through `EventContext`.
use crate::numerical::IVP::IVP_errors::{IVPError, PossibleMissedEvent};
use crate::numerical::IVP::dense_output::Segment;
use log::{info, warn};
use nalgebra::DVector;
use std::cmp::Ordering;
use std::sync::Arc;
use strum_macros::Display;

pub type ConditionFn = Arc<dyn Fn(f64, &DVector<f64>) -> f64 + Send + Sync>;
pub type PredicateFn = Arc<dyn Fn(f64, &DVector<f64>) -> bool + Send + Sync>;
pub type EffectFn = Arc<dyn Fn(&mut EventContext) + Send + Sync>;

/// Which sign changes of a continuous condition count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CrossingDirection {
    Any,
    /// negative to non-negative
    Rising,
    /// positive to non-positive
    Falling,
}

/// Which states are recorded as samples when an event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SavePosition {
    Before,
    After,
    Both,
}

impl SavePosition {
    pub fn before(&self) -> bool {
        matches!(self, SavePosition::Before | SavePosition::Both)
    }
    pub fn after(&self) -> bool {
        matches!(self, SavePosition::After | SavePosition::Both)
    }
}

#[derive(Clone)]
pub enum EventKind {
    Continuous {
        condition: ConditionFn,
        direction: CrossingDirection,
        rootfind: bool,
    },
    Discrete {
        predicate: PredicateFn,
    },
}

#[derive(Clone)]
pub struct EventDefinition {
    pub name: String,
    pub kind: EventKind,
    pub effect: EffectFn,
    pub save_position: SavePosition,
}

impl std::fmt::Debug for EventDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            EventKind::Continuous {
                direction, rootfind, ..
            } => format!("continuous(direction = {}, rootfind = {})", direction, rootfind),
            EventKind::Discrete { .. } => "discrete".to_string(),
        };
        write!(
            f,
            "EventDefinition {{ name: {:?}, kind: {}, save_position: {} }}",
            self.name, kind, self.save_position
        )
    }
}

impl EventDefinition {
    /// Fires when `condition` crosses zero.
    pub fn continuous<G, E>(name: &str, condition: G, effect: E) -> Self
    where
        G: Fn(f64, &DVector<f64>) -> f64 + Send + Sync + 'static,
        E: Fn(&mut EventContext) + Send + Sync + 'static,
    {
        EventDefinition {
            name: name.to_string(),
            kind: EventKind::Continuous {
                condition: Arc::new(condition),
                direction: CrossingDirection::Any,
                rootfind: true,
            },
            effect: Arc::new(effect),
            save_position: SavePosition::Both,
        }
    }

    /// Fires at the end of every accepted step where `predicate` holds.
    pub fn discrete<Pr, E>(name: &str, predicate: Pr, effect: E) -> Self
    where
        Pr: Fn(f64, &DVector<f64>) -> bool + Send + Sync + 'static,
        E: Fn(&mut EventContext) + Send + Sync + 'static,
    {
        EventDefinition {
            name: name.to_string(),
            kind: EventKind::Discrete {
                predicate: Arc::new(predicate),
            },
            effect: Arc::new(effect),
            save_position: SavePosition::Both,
        }
    }

    /// Continuous event that stops the integration.
    pub fn terminating<G>(name: &str, condition: G) -> Self
    where
        G: Fn(f64, &DVector<f64>) -> f64 + Send + Sync + 'static,
    {
        Self::continuous(name, condition, |ctx: &mut EventContext| ctx.terminate())
    }

    /// Ignored for discrete events.
    pub fn with_direction(mut self, direction: CrossingDirection) -> Self {
        if let EventKind::Continuous { direction: d, .. } = &mut self.kind {
            *d = direction;
        }
        self
    }

    /// Without root finding a continuous event fires at the end of the step that crossed.
    pub fn with_rootfind(mut self, rootfind: bool) -> Self {
        if let EventKind::Continuous { rootfind: r, .. } = &mut self.kind {
            *r = rootfind;
        }
        self
    }

    pub fn with_save_position(mut self, save_position: SavePosition) -> Self {
        self.save_position = save_position;
        self
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self.kind, EventKind::Continuous { .. })
    }
}

/// Ordered collection of events; the order breaks ties between simultaneous events.
#[derive(Debug, Clone, Default)]
pub struct CallbackSet {
    events: Vec<EventDefinition>,
}

impl CallbackSet {
    pub fn new() -> Self {
        CallbackSet { events: Vec::new() }
    }

    /// returns the registration index
    pub fn push(&mut self, event: EventDefinition) -> usize {
        self.events.push(event);
        self.events.len() - 1
    }

    pub fn with(mut self, event: EventDefinition) -> Self {
        self.push(event);
        self
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&EventDefinition> {
        self.events.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EventDefinition> {
        self.events.iter()
    }
}

/// What an effect may see and change.
#[derive(Debug)]
pub struct EventContext {
    t: f64,
    state: DVector<f64>,
    t_final: f64,
    direction: f64,
    index: usize,
    name: String,
    modified: bool,
    terminate: bool,
    new_time: Option<f64>,
    step_override: Option<f64>,
    time_jump_error: Option<IVPError>,
}

impl EventContext {
    fn new(t: f64, state: DVector<f64>, t_final: f64, direction: f64, index: usize, name: &str) -> Self {
        EventContext {
            t,
            state,
            t_final,
            direction,
            index,
            name: name.to_string(),
            modified: false,
            terminate: false,
            new_time: None,
            step_override: None,
            time_jump_error: None,
        }
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn state(&self) -> &DVector<f64> {
        &self.state
    }

    /// mutable access marks the state as modified
    pub fn state_mut(&mut self) -> &mut DVector<f64> {
        self.modified = true;
        &mut self.state
    }

    pub fn set_state(&mut self, state: DVector<f64>) {
        self.modified = true;
        self.state = state;
    }

    /// Restart the integration at `t`, which must lie between the event time
    /// and the end of the span. The gap is bridged by a constant segment.
    pub fn set_time(&mut self, t: f64) -> Result<(), IVPError> {
        let d = self.direction;
        if !t.is_finite() || d * (t - self.t) < 0.0 || d * (self.t_final - t) < 0.0 {
            let err = IVPError::InvalidTimeJump { from: self.t, to: t };
            self.time_jump_error = Some(err.clone());
            return Err(err);
        }
        self.new_time = Some(t);
        Ok(())
    }

    /// magnitude of the first step after the restart
    pub fn set_step(&mut self, h: f64) {
        self.step_override = Some(h.abs());
    }

    pub fn terminate(&mut self) {
        self.terminate = true;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate
    }

    pub fn event_index(&self) -> usize {
        self.index
    }

    pub fn event_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EventPhase {
    Armed,
    Locating,
    Fired,
    Terminated,
}

/// One firing, as kept in the solution's event log.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub t: f64,
    pub index: usize,
    pub name: String,
}

/// Everything the integration loop needs to restart after events fired in a segment.
#[derive(Debug, Clone)]
pub struct EventFiring {
    pub t: f64,
    pub pre_state: DVector<f64>,
    pub post_state: DVector<f64>,
    /// restart time; differs from `t` after a time jump
    pub new_time: f64,
    pub modified: bool,
    pub terminate: bool,
    pub step_override: Option<f64>,
    pub save_before: bool,
    pub save_after: bool,
    pub records: Vec<EventRecord>,
}

/// Crossing test between consecutive condition values.
pub fn sign_change_detected(g0: f64, g1: f64, direction: CrossingDirection) -> bool {
    if !g0.is_finite() || !g1.is_finite() || g0 == 0.0 {
        return false;
    }
    if g1 != 0.0 && g0.signum() == g1.signum() {
        return false;
    }
    match direction {
        CrossingDirection::Any => true,
        CrossingDirection::Rising => g0 < 0.0,
        CrossingDirection::Falling => g0 > 0.0,
    }
}

/// Bracketed root of `f` between `t_pre` (value `g_pre != 0`) and `t_post`
/// (value `g_post`, zero or of opposite sign). Secant steps with a bisection
/// fallback when one end of the bracket stalls. The answer is the post-crossing
/// end of the final bracket, at most `tol` away from the root.
pub fn bracket_root<F>(
    mut f: F,
    t_pre: f64,
    t_post: f64,
    g_pre: f64,
    g_post: f64,
    tol: f64,
    max_iter: usize,
) -> Result<f64, IVPError>
where
    F: FnMut(f64) -> Result<f64, IVPError>,
{
    if g_post == 0.0 {
        return Ok(t_post);
    }
    let (mut a, mut fa, mut b, mut fb) = (t_pre, g_pre, t_post, g_post);
    // (side last moved, how many times in a row)
    let mut stall: (i8, usize) = (0, 0);
    for _ in 0..max_iter {
        let width = (b - a).abs();
        if width <= tol {
            break;
        }
        let bisect = stall.1 >= 2;
        let mid = a + 0.5 * (b - a);
        let mut c = if bisect { mid } else { b - fb * (b - a) / (fb - fa) };
        let margin = 0.5 * tol.min(0.25 * width);
        let (lo, hi) = if a < b {
            (a + margin, b - margin)
        } else {
            (b + margin, a - margin)
        };
        c = if c.is_finite() { c.clamp(lo, hi) } else { mid };
        if c == a || c == b {
            break;
        }
        let fc = f(c)?;
        if fc == 0.0 {
            return Ok(c);
        }
        let side = if fc.signum() == fa.signum() {
            a = c;
            fa = fc;
            -1
        } else {
            b = c;
            fb = fc;
            1
        };
        stall = if bisect {
            (0, 0)
        } else if side == stall.0 {
            (side, stall.1 + 1)
        } else {
            (side, 1)
        };
    }
    Ok(b)
}

/// Per-trajectory event bookkeeping.
#[derive(Debug, Clone)]
pub struct EventEngine {
    callbacks: CallbackSet,
    /// condition values at the current integration point
    previous: Vec<f64>,
    phases: Vec<EventPhase>,
    warnings: Vec<PossibleMissedEvent>,
    time_tolerance: f64,
    midpoint_check: bool,
    direction: f64,
    t_final: f64,
    /// fired at the current restart point
    just_fired: Vec<bool>,
    pub max_root_iterations: usize,
}

impl EventEngine {
    pub fn new(
        callbacks: &CallbackSet,
        time_tolerance: f64,
        midpoint_check: bool,
        direction: f64,
        t_final: f64,
    ) -> Self {
        let n = callbacks.len();
        EventEngine {
            callbacks: callbacks.clone(),
            previous: vec![f64::NAN; n],
            phases: vec![EventPhase::Armed; n],
            warnings: Vec::new(),
            time_tolerance,
            midpoint_check,
            direction,
            t_final,
            just_fired: vec![false; n],
            max_root_iterations: 200,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn phase(&self, index: usize) -> Option<EventPhase> {
        self.phases.get(index).copied()
    }

    pub fn take_warnings(&mut self) -> Vec<PossibleMissedEvent> {
        std::mem::take(&mut self.warnings)
    }

    /// Evaluate every condition at a (re)start point and arm the events that
    /// have not terminated.
    pub fn rearm_at(&mut self, t: f64, y: &DVector<f64>) {
        for (i, ev) in self.callbacks.iter().enumerate() {
            if let EventKind::Continuous { condition, .. } = &ev.kind {
                self.previous[i] = condition(t, y);
            }
            if self.phases[i] != EventPhase::Terminated {
                self.phases[i] = EventPhase::Armed;
            }
        }
    }

    /// Start of the crossing search for an event that fired at `t0`: a point
    /// just past the restart, clear of the root that was already handled.
    fn settle_point(&self, t0: f64, t1: f64) -> f64 {
        let offset = (100.0 * self.time_tolerance).max(16.0 * f64::EPSILON * t0.abs());
        t0 + self.direction * offset.min(0.5 * (t1 - t0).abs())
    }

    /// Check an accepted segment. Returns the earliest firing (all events at
    /// that exact time, in registration order, stopping after a terminate).
    pub fn process_segment(&mut self, segment: &Segment) -> Result<Option<EventFiring>, IVPError> {
        if self.callbacks.is_empty() {
            return Ok(None);
        }
        let (t1, d) = (segment.t_end, self.direction);
        let just_fired = std::mem::replace(&mut self.just_fired, vec![false; self.callbacks.len()]);
        let mut g_end = self.previous.clone();
        let mut candidates: Vec<(f64, usize)> = Vec::new();
        let mut discrete: Vec<usize> = Vec::new();
        for (i, ev) in self.callbacks.iter().enumerate() {
            if self.phases[i] == EventPhase::Terminated {
                continue;
            }
            match &ev.kind {
                EventKind::Continuous {
                    condition,
                    direction,
                    rootfind,
                } => {
                    let (t0, g0) = if just_fired[i] {
                        let ts = self.settle_point(segment.t_start, t1);
                        (ts, condition(ts, &segment.evaluate(ts, 0)?))
                    } else {
                        (segment.t_start, self.previous[i])
                    };
                    let g1 = condition(t1, &segment.y_end);
                    g_end[i] = g1;
                    if !g1.is_finite() {
                        warn!("condition of event '{}' is not finite at t = {}", ev.name, t1);
                        continue;
                    }
                    if sign_change_detected(g0, g1, *direction) {
                        self.phases[i] = EventPhase::Locating;
                        let t_e = if *rootfind {
                            let g = |t: f64| -> Result<f64, IVPError> {
                                Ok(condition(t, &segment.evaluate(t, 0)?))
                            };
                            bracket_root(
                                g,
                                t0,
                                t1,
                                g0,
                                g1,
                                self.time_tolerance,
                                self.max_root_iterations,
                            )?
                        } else {
                            t1
                        };
                        candidates.push((t_e, i));
                    } else if self.midpoint_check && g0 != 0.0 && g1 != 0.0 && g0.signum() == g1.signum() {
                        let tm = t0 + 0.5 * (t1 - t0);
                        let gm = condition(tm, &segment.evaluate(tm, 0)?);
                        if gm != 0.0 && gm.signum() != g0.signum() {
                            let warning = PossibleMissedEvent {
                                index: i,
                                name: ev.name.clone(),
                                t_start: segment.t_start,
                                t_end: t1,
                            };
                            warn!("{}", warning);
                            self.warnings.push(warning);
                        }
                    }
                }
                EventKind::Discrete { .. } => discrete.push(i),
            }
        }
        // the step ends at the earliest crossing when there is one
        let t_check = candidates
            .iter()
            .map(|c| c.0)
            .min_by(|a, b| (d * a).total_cmp(&(d * b)))
            .unwrap_or(t1);
        if !discrete.is_empty() {
            let y_check = segment.evaluate(t_check, 0)?;
            for i in discrete {
                if let EventKind::Discrete { predicate } = &self.callbacks.events[i].kind {
                    if predicate(t_check, &y_check) {
                        candidates.push((t_check, i));
                    }
                }
            }
        }
        if candidates.is_empty() {
            self.previous = g_end;
            return Ok(None);
        }
        candidates.sort_by(|a, b| {
            (d * a.0)
                .partial_cmp(&(d * b.0))
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        let t_e = candidates[0].0;
        // crossings located later than the winner are found again after the restart
        for &(t, i) in candidates.iter() {
            if t != t_e {
                self.phases[i] = EventPhase::Armed;
            }
        }
        let pre_state = segment.evaluate(t_e, 0)?;
        let mut firing = EventFiring {
            t: t_e,
            pre_state: pre_state.clone(),
            post_state: pre_state,
            new_time: t_e,
            modified: false,
            terminate: false,
            step_override: None,
            save_before: false,
            save_after: false,
            records: Vec::new(),
        };
        for &(_, i) in candidates.iter().filter(|c| c.0 == t_e) {
            let ev = &self.callbacks.events[i];
            let state = std::mem::replace(&mut firing.post_state, DVector::zeros(0));
            let mut ctx = EventContext::new(t_e, state, self.t_final, d, i, &ev.name);
            (ev.effect)(&mut ctx);
            if let Some(err) = ctx.time_jump_error.take() {
                return Err(err);
            }
            firing.post_state = ctx.state;
            firing.modified |= ctx.modified;
            if let Some(t_new) = ctx.new_time {
                firing.new_time = t_new;
            }
            if ctx.step_override.is_some() {
                firing.step_override = ctx.step_override;
            }
            firing.save_before |= ev.save_position.before();
            firing.save_after |= ev.save_position.after();
            firing.records.push(EventRecord {
                t: t_e,
                index: i,
                name: ev.name.clone(),
            });
            info!("event '{}' (#{}) fired at t = {}", ev.name, i, t_e);
            self.just_fired[i] = true;
            if ctx.terminate {
                self.phases[i] = EventPhase::Terminated;
                firing.terminate = true;
                break;
            }
            self.phases[i] = EventPhase::Fired;
        }
        // simultaneous events skipped by a terminate
        for phase in self.phases.iter_mut() {
            if *phase == EventPhase::Locating {
                *phase = EventPhase::Armed;
            }
        }
        Ok(Some(firing))
    }
}
