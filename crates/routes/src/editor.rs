//! Route editing workflow.
//!
//! `Empty → Tracing → Drawing → SettingAnchor → Ready`, with the anchor
//! index kept consistent under point removal. The editor instance is the
//! placement session: map clicks are fed into it by the caller, and
//! nothing here touches process-global state.
//!
//! Tracing talks to an external road-tracing collaborator through the
//! [`RoadTracer`] trait; its returned polyline is opaque input.

use std::future::Future;
use std::pin::Pin;

use geo::Point;

use crate::identifiers::RouteId;
use crate::models::{CompassDirection, MileAnchor, Result, Route, RouteError};

// ============================================================================
// Trace collaborator
// ============================================================================

/// Snaps two clicked points to real road geometry.
pub trait RoadTracer: Send + Sync {
    /// Returns an ordered polyline from `start` to `end`.
    fn trace<'a>(
        &'a self,
        start: Point,
        end: Point,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Point>>> + Send + 'a>>;
}

// ============================================================================
// State machine
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditorState {
    Empty,
    Tracing,
    Drawing,
    SettingAnchor,
    Ready,
}

impl EditorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "Empty",
            Self::Tracing => "Tracing",
            Self::Drawing => "Drawing",
            Self::SettingAnchor => "SettingAnchor",
            Self::Ready => "Ready",
        }
    }
}

/// Outcome of feeding a map click into the editor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MapClick {
    /// Tracing: the start point is now held, waiting for the end click.
    StartHeld(Point),
    /// Tracing: both endpoints are in; run the tracer with these.
    TraceReady { start: Point, end: Point },
    /// Drawing: the point was appended at this index.
    PointAdded(usize),
}

/// One editing session for a route.
///
/// Uncommitted state lives entirely in this object; nothing is persisted
/// until [`RouteEditor::save`] hands a validated [`Route`] to the store.
#[derive(Clone, Debug)]
pub struct RouteEditor {
    state: EditorState,
    route_id: Option<RouteId>,
    name: String,
    aliases: Vec<String>,
    points: Vec<Point>,
    bidirectional: bool,
    direction: Option<CompassDirection>,
    limited_access: bool,
    anchor_index: Option<usize>,
    mm_value: Option<f64>,
    miles_decrease_toward: Option<CompassDirection>,
    trace_start: Option<Point>,
}

impl RouteEditor {
    /// Start a fresh session for a new route.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: EditorState::Empty,
            route_id: None,
            name: name.into(),
            aliases: Vec::new(),
            points: Vec::new(),
            bidirectional: true,
            direction: None,
            limited_access: false,
            anchor_index: None,
            mm_value: None,
            miles_decrease_toward: None,
            trace_start: None,
        }
    }

    /// Start a session editing an existing route.
    ///
    /// A complete route opens in `Ready`; a route saved as working state
    /// without an anchor opens in `Drawing`.
    pub fn edit(route: Route) -> Self {
        let state = if route.is_resolvable() {
            EditorState::Ready
        } else {
            EditorState::Drawing
        };
        Self {
            state,
            route_id: Some(route.id),
            name: route.name,
            aliases: route.aliases,
            points: route.points,
            bidirectional: route.bidirectional,
            direction: route.direction,
            limited_access: route.limited_access,
            anchor_index: route.anchor.map(|a| a.point_index),
            mm_value: route.anchor.map(|a| a.mm_value),
            miles_decrease_toward: route.miles_decrease_toward,
            trace_start: None,
        }
    }

    pub fn state(&self) -> EditorState {
        self.state
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn anchor_index(&self) -> Option<usize> {
        self.anchor_index
    }

    /// Held trace start point, if any (survives a failed trace for retry).
    pub fn trace_start(&self) -> Option<Point> {
        self.trace_start
    }

    fn invalid_state(&self) -> RouteError {
        RouteError::InvalidState {
            state: self.state.as_str(),
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Enter trace mode. Only valid with no points yet.
    pub fn begin_trace(&mut self) -> Result<()> {
        if self.state != EditorState::Empty {
            return Err(self.invalid_state());
        }
        self.state = EditorState::Tracing;
        Ok(())
    }

    /// Enter manual draw mode. Only valid with no points yet.
    pub fn begin_draw(&mut self) -> Result<()> {
        if self.state != EditorState::Empty {
            return Err(self.invalid_state());
        }
        self.state = EditorState::Drawing;
        Ok(())
    }

    /// Feed a map click into the session.
    pub fn map_click(&mut self, p: Point) -> Result<MapClick> {
        match self.state {
            EditorState::Tracing => match self.trace_start {
                None => {
                    self.trace_start = Some(p);
                    Ok(MapClick::StartHeld(p))
                }
                Some(start) => Ok(MapClick::TraceReady { start, end: p }),
            },
            EditorState::Drawing => {
                self.points.push(p);
                Ok(MapClick::PointAdded(self.points.len() - 1))
            }
            _ => Err(self.invalid_state()),
        }
    }

    /// Run the trace collaborator against the held start point.
    ///
    /// On failure the start point is retained and the session stays in
    /// `Tracing` so the user can retry with a different end click.
    pub async fn run_trace(&mut self, tracer: &dyn RoadTracer, end: Point) -> Result<()> {
        if self.state != EditorState::Tracing {
            return Err(self.invalid_state());
        }
        let start = self.trace_start.ok_or(RouteError::TraceFailed(
            "no start point held".into(),
        ))?;

        match tracer.trace(start, end).await {
            Ok(polyline) if polyline.len() >= 2 => {
                self.points = polyline;
                self.trace_start = None;
                self.state = EditorState::Drawing;
                Ok(())
            }
            Ok(_) => Err(RouteError::TraceFailed("no route found".into())),
            Err(e) => Err(RouteError::TraceFailed(e.to_string())),
        }
    }

    /// Append a point to the end of the sequence.
    pub fn add_point(&mut self, p: Point) -> Result<usize> {
        if self.state != EditorState::Drawing && self.state != EditorState::Ready {
            return Err(self.invalid_state());
        }
        self.points.push(p);
        Ok(self.points.len() - 1)
    }

    /// Remove the point at index `k`, shifting later indices down.
    ///
    /// Removing a point before the anchor decrements the anchor index;
    /// removing the anchor itself clears it and forces the session back
    /// to `SettingAnchor` before save is allowed again.
    pub fn remove_point(&mut self, k: usize) -> Result<()> {
        if !matches!(
            self.state,
            EditorState::Drawing | EditorState::SettingAnchor | EditorState::Ready
        ) {
            return Err(self.invalid_state());
        }
        if k >= self.points.len() {
            return Err(RouteError::Validation(format!(
                "point index {} out of bounds for {} points",
                k,
                self.points.len()
            )));
        }
        self.points.remove(k);

        if let Some(anchor) = self.anchor_index {
            if k == anchor {
                self.anchor_index = None;
                self.mm_value = None;
                self.state = EditorState::SettingAnchor;
            } else if k < anchor {
                self.anchor_index = Some(anchor - 1);
            }
        }
        Ok(())
    }

    /// Select an existing point as the anchor; the session moves to the
    /// value/direction entry step.
    pub fn select_anchor(&mut self, index: usize) -> Result<()> {
        if !matches!(
            self.state,
            EditorState::Drawing | EditorState::SettingAnchor | EditorState::Ready
        ) {
            return Err(self.invalid_state());
        }
        if index >= self.points.len() {
            return Err(RouteError::Validation(format!(
                "anchor index {} out of bounds for {} points",
                index,
                self.points.len()
            )));
        }
        self.anchor_index = Some(index);
        self.state = EditorState::SettingAnchor;
        Ok(())
    }

    /// Provide the known mile value and decrease direction, completing
    /// the anchor. The session becomes `Ready`.
    pub fn set_anchor_value(
        &mut self,
        mm_value: f64,
        miles_decrease_toward: CompassDirection,
    ) -> Result<()> {
        if self.state != EditorState::SettingAnchor {
            return Err(self.invalid_state());
        }
        if self.anchor_index.is_none() {
            return Err(RouteError::Validation("no anchor point selected".into()));
        }
        if !mm_value.is_finite() || mm_value < 0.0 {
            return Err(RouteError::Validation(format!(
                "anchor mile value {mm_value} must be a finite non-negative number"
            )));
        }
        self.mm_value = Some(mm_value);
        self.miles_decrease_toward = Some(miles_decrease_toward);
        self.state = EditorState::Ready;
        Ok(())
    }

    pub fn set_bidirectional(&mut self, bidirectional: bool) {
        self.bidirectional = bidirectional;
    }

    pub fn set_direction(&mut self, direction: Option<CompassDirection>) {
        self.direction = direction;
    }

    pub fn set_limited_access(&mut self, limited_access: bool) {
        self.limited_access = limited_access;
    }

    pub fn add_alias(&mut self, alias: &str) {
        let alias = alias.trim().to_ascii_uppercase();
        if !alias.is_empty() && !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
    }

    /// Build the route for persistence. Permitted only in `Ready` with
    /// all invariants holding; never produces a half-applied route.
    pub fn save(&self) -> Result<Route> {
        if self.state != EditorState::Ready {
            return Err(self.invalid_state());
        }
        let (anchor_index, mm_value) = match (self.anchor_index, self.mm_value) {
            (Some(i), Some(v)) => (i, v),
            _ => return Err(RouteError::Validation("anchor is incomplete".into())),
        };
        let route = Route {
            id: self.route_id.unwrap_or(RouteId::new(0)),
            name: self.name.clone(),
            aliases: self.aliases.clone(),
            points: self.points.clone(),
            bidirectional: self.bidirectional,
            direction: self.direction,
            limited_access: self.limited_access,
            anchor: Some(MileAnchor {
                point_index: anchor_index,
                mm_value,
            }),
            miles_decrease_toward: self.miles_decrease_toward,
        };
        route.validate()?;
        Ok(route)
    }

    /// Discard all uncommitted state and return to `Empty`.
    pub fn cancel(&mut self) {
        self.points.clear();
        self.anchor_index = None;
        self.mm_value = None;
        self.miles_decrease_toward = None;
        self.trace_start = None;
        self.state = EditorState::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTracer(Vec<Point>);

    impl RoadTracer for FixedTracer {
        fn trace<'a>(
            &'a self,
            _start: Point,
            _end: Point,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Point>>> + Send + 'a>> {
            let points = self.0.clone();
            Box::pin(async move {
                if points.is_empty() {
                    Err(RouteError::TraceFailed("no route found".into()))
                } else {
                    Ok(points)
                }
            })
        }
    }

    fn block_on<F: Future>(fut: F) -> F::Output {
        // The editor future never actually suspends in tests; poll it once.
        use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
        fn noop_raw_waker() -> RawWaker {
            fn clone(_: *const ()) -> RawWaker {
                noop_raw_waker()
            }
            fn noop(_: *const ()) {}
            RawWaker::new(
                std::ptr::null(),
                &RawWakerVTable::new(clone, noop, noop, noop),
            )
        }
        let waker = unsafe { Waker::from_raw(noop_raw_waker()) };
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(fut);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(out) => out,
            Poll::Pending => panic!("editor future suspended"),
        }
    }

    fn drawn_editor() -> RouteEditor {
        let mut editor = RouteEditor::new("I-76");
        editor.begin_draw().unwrap();
        editor.add_point(Point::new(-75.0, 40.06)).unwrap();
        editor.add_point(Point::new(-75.0, 40.03)).unwrap();
        editor.add_point(Point::new(-75.0, 40.00)).unwrap();
        editor
    }

    #[test]
    fn test_draw_then_anchor_then_save() {
        let mut editor = drawn_editor();
        editor.select_anchor(1).unwrap();
        assert_eq!(editor.state(), EditorState::SettingAnchor);
        editor.set_anchor_value(320.0, CompassDirection::NB).unwrap();
        assert_eq!(editor.state(), EditorState::Ready);

        let route = editor.save().unwrap();
        assert_eq!(route.anchor.unwrap().point_index, 1);
        assert!(route.is_resolvable());
    }

    #[test]
    fn test_save_blocked_before_anchor_complete() {
        let mut editor = drawn_editor();
        assert!(editor.save().is_err());
        editor.select_anchor(0).unwrap();
        // Value not entered yet
        assert!(editor.save().is_err());
    }

    #[test]
    fn test_remove_point_before_anchor_shifts_index() {
        // Points [A, B, C] with anchor at index 1 (B)
        let mut editor = drawn_editor();
        editor.select_anchor(1).unwrap();
        editor.set_anchor_value(10.0, CompassDirection::NB).unwrap();

        // Removing A shifts the anchor to index 0
        editor.remove_point(0).unwrap();
        assert_eq!(editor.anchor_index(), Some(0));
        assert_eq!(editor.state(), EditorState::Ready);
        assert!(editor.save().is_ok());
    }

    #[test]
    fn test_remove_anchor_point_clears_anchor_and_blocks_save() {
        let mut editor = drawn_editor();
        editor.select_anchor(1).unwrap();
        editor.set_anchor_value(10.0, CompassDirection::NB).unwrap();

        // Removing B (the anchor) clears it and forces SettingAnchor
        editor.remove_point(1).unwrap();
        assert_eq!(editor.anchor_index(), None);
        assert_eq!(editor.state(), EditorState::SettingAnchor);
        assert!(editor.save().is_err());
    }

    #[test]
    fn test_remove_point_after_anchor_leaves_index() {
        let mut editor = drawn_editor();
        editor.select_anchor(0).unwrap();
        editor.set_anchor_value(5.0, CompassDirection::SB).unwrap();
        editor.remove_point(2).unwrap();
        assert_eq!(editor.anchor_index(), Some(0));
    }

    #[test]
    fn test_trace_success_moves_to_drawing() {
        let mut editor = RouteEditor::new("US-30");
        editor.begin_trace().unwrap();

        let start = Point::new(-75.0, 40.0);
        let end = Point::new(-75.1, 40.1);
        assert_eq!(editor.map_click(start).unwrap(), MapClick::StartHeld(start));
        assert_eq!(
            editor.map_click(end).unwrap(),
            MapClick::TraceReady { start, end }
        );

        let tracer = FixedTracer(vec![start, Point::new(-75.05, 40.05), end]);
        block_on(editor.run_trace(&tracer, end)).unwrap();
        assert_eq!(editor.state(), EditorState::Drawing);
        assert_eq!(editor.points().len(), 3);
        assert_eq!(editor.trace_start(), None);
    }

    #[test]
    fn test_trace_failure_retains_start_point() {
        let mut editor = RouteEditor::new("US-30");
        editor.begin_trace().unwrap();
        let start = Point::new(-75.0, 40.0);
        editor.map_click(start).unwrap();

        let tracer = FixedTracer(vec![]);
        let err = block_on(editor.run_trace(&tracer, Point::new(-75.1, 40.1))).unwrap_err();
        assert!(matches!(err, RouteError::TraceFailed(_)));

        // Start point retained for retry, still tracing
        assert_eq!(editor.state(), EditorState::Tracing);
        assert_eq!(editor.trace_start(), Some(start));
    }

    #[test]
    fn test_cancel_discards_everything() {
        let mut editor = drawn_editor();
        editor.select_anchor(1).unwrap();
        editor.cancel();
        assert_eq!(editor.state(), EditorState::Empty);
        assert!(editor.points().is_empty());
        assert_eq!(editor.anchor_index(), None);
    }

    #[test]
    fn test_begin_trace_requires_empty() {
        let mut editor = drawn_editor();
        assert!(editor.begin_trace().is_err());
    }

    #[test]
    fn test_edit_existing_complete_route_is_ready() {
        let mut editor = drawn_editor();
        editor.select_anchor(1).unwrap();
        editor.set_anchor_value(320.0, CompassDirection::NB).unwrap();
        let mut route = editor.save().unwrap();
        route.id = RouteId::new(7);

        let reopened = RouteEditor::edit(route);
        assert_eq!(reopened.state(), EditorState::Ready);
        let saved = reopened.save().unwrap();
        assert_eq!(saved.id, RouteId::new(7));
    }
}
