//! Session controller.
//!
//! Owns the surface, tool, variables and annotations of one drawing session
//! and sequences the submission cycle:
//!
//! ```text
//! Ready --begin_submit--> Submitting --complete(ok)--> Ready
//!                                    --complete(err)-> Failed
//! any   --reset---------> Ready  (the pending ticket goes stale)
//! ```
//!
//! Drawing stays available in every submission state. A submission is split
//! into `begin_submit`, which snapshots everything the request needs, and
//! `complete_submission`, which applies the outcome only if its ticket is
//! still the one in flight.

use image::{Rgba, RgbaImage};
use log::{debug, info, warn};
use serde::Serialize;

use crate::annotation::{AnnotationId, AnnotationManager};
use crate::bbox;
use crate::color;
use crate::config::{AnnotationPolicy, Config};
use crate::error::SubmitError;
use crate::geom::{BoundingBox, Point};
use crate::recognition::{RecognitionRequest, RecognitionResult, Recognizer};
use crate::render::Typesetter;
use crate::stroke::StrokeEngine;
use crate::tool::{ToolMode, ToolState};
use crate::variables::VariableContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SubmissionTicket(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionState {
    Ready,
    Submitting { ticket: SubmissionTicket, anchor: Point },
    Failed(SubmitError),
}

/// Everything captured when a submission starts. Later drawing does not
/// affect it.
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    pub ticket: SubmissionTicket,
    pub snapshot: RgbaImage,
    pub variables: VariableContext,
    pub bbox: BoundingBox,
    pub anchor: Point,
}

impl PendingSubmission {
    pub fn request(&self) -> Result<RecognitionRequest, SubmitError> {
        RecognitionRequest::from_snapshot(&self.snapshot, &self.variables)
            .map_err(|err| SubmitError::TransportFailure(format!("{err:#}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Applied {
        ticket: SubmissionTicket,
        annotations: Vec<AnnotationId>,
    },
    Failed {
        ticket: SubmissionTicket,
        error: SubmitError,
    },
    /// The ticket was no longer in flight (reset in between); nothing changed.
    Discarded { ticket: SubmissionTicket },
}

pub struct Session {
    engine: StrokeEngine,
    tool: ToolState,
    variables: VariableContext,
    annotations: AnnotationManager,
    state: SubmissionState,
    next_ticket: u64,
    policy: AnnotationPolicy,
    default_anchor: Point,
    last_anchor: Option<Point>,
    typeset_revision: Option<u64>,
}

impl Session {
    /// Session without a surface; call `resize` with the viewport size.
    pub fn new(config: &Config) -> Self {
        Self {
            engine: StrokeEngine::new(),
            tool: config.tools.initial_tool(),
            variables: VariableContext::new(),
            annotations: AnnotationManager::new(config.layout.annotation_step),
            state: SubmissionState::Ready,
            next_ticket: 1,
            policy: config.layout.policy,
            default_anchor: config.layout.default_anchor,
            last_anchor: None,
            typeset_revision: None,
        }
    }

    pub fn with_viewport(config: &Config, width: u32, height: u32) -> Self {
        Self {
            engine: StrokeEngine::with_size(width, height),
            ..Self::new(config)
        }
    }

    /// Matches the surface to the viewport. Drawn content is lost.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.engine.resize(width, height);
    }

    // --- pointer input ---

    pub fn press(&mut self, point: Point) {
        self.engine.begin_stroke(point, &self.tool);
    }

    pub fn move_to(&mut self, point: Point) {
        self.engine.extend_stroke(point);
    }

    pub fn release(&mut self) {
        self.engine.end_stroke();
    }

    /// Pointer left the surface; same as a release.
    pub fn leave(&mut self) {
        self.engine.end_stroke();
    }

    pub fn is_drawing(&self) -> bool {
        self.engine.is_drawing()
    }

    // --- tool changes, applied from the next press ---

    pub fn tool(&self) -> &ToolState {
        &self.tool
    }

    pub fn set_color(&mut self, color: Rgba<u8>) {
        self.tool.color = color;
    }

    /// Picks a palette swatch. Returns false for an unknown index.
    pub fn select_swatch(&mut self, index: usize) -> bool {
        match color::swatch(index) {
            Some(c) => {
                self.tool.color = c;
                true
            }
            None => false,
        }
    }

    pub fn set_mode(&mut self, mode: ToolMode) {
        self.tool.mode = mode;
    }

    pub fn toggle_mode(&mut self) -> ToolMode {
        self.tool.mode = self.tool.mode.toggled();
        self.tool.mode
    }

    pub fn set_width(&mut self, width: u32) -> u32 {
        self.tool.set_width(width)
    }

    // --- state ---

    pub fn surface(&self) -> Option<&RgbaImage> {
        self.engine.surface()
    }

    pub fn clear_surface(&mut self) {
        self.engine.clear();
    }

    pub fn variables(&self) -> &VariableContext {
        &self.variables
    }

    pub fn annotations(&self) -> &AnnotationManager {
        &self.annotations
    }

    pub fn reposition(&mut self, id: AnnotationId, position: Point) -> bool {
        self.annotations.reposition(id, position)
    }

    pub fn submission_state(&self) -> &SubmissionState {
        &self.state
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.state, SubmissionState::Submitting { .. })
    }

    pub fn last_error(&self) -> Option<&SubmitError> {
        match &self.state {
            SubmissionState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Anchor of the last applied submission, else the configured default.
    pub fn anchor(&self) -> Point {
        self.last_anchor.unwrap_or(self.default_anchor)
    }

    /// Clears drawing, annotations and variables. A submission still in
    /// flight will be discarded when it completes.
    pub fn reset(&mut self) {
        if let SubmissionState::Submitting { ticket, .. } = self.state {
            info!("reset abandons submission {}", ticket.0);
        }
        self.engine.end_stroke();
        self.engine.clear();
        self.annotations.clear_all();
        self.variables.clear();
        self.state = SubmissionState::Ready;
        self.last_anchor = None;
    }

    // --- submission ---

    pub fn begin_submit(&mut self) -> Result<PendingSubmission, SubmitError> {
        if let SubmissionState::Submitting { ticket, .. } = self.state {
            warn!("submit rejected: submission {} still in flight", ticket.0);
            return Err(SubmitError::InFlight);
        }
        self.annotations.clear_batch_indicator();

        let captured = self
            .engine
            .snapshot()
            .and_then(|snapshot| bbox::extract(&snapshot).map(|bbox| (snapshot, bbox)));
        let Some((snapshot, bbox)) = captured else {
            warn!("submit rejected: surface is empty");
            self.state = SubmissionState::Failed(SubmitError::EmptySurface);
            return Err(SubmitError::EmptySurface);
        };

        let ticket = SubmissionTicket(self.next_ticket);
        self.next_ticket += 1;
        let anchor = bbox.center();
        self.state = SubmissionState::Submitting { ticket, anchor };
        info!(
            "submission {} started: content {}x{} at ({}, {}), {} variable(s)",
            ticket.0,
            bbox.width(),
            bbox.height(),
            bbox.min_x,
            bbox.min_y,
            self.variables.len()
        );

        Ok(PendingSubmission {
            ticket,
            snapshot,
            variables: self.variables.clone(),
            bbox,
            anchor,
        })
    }

    pub fn complete_submission(
        &mut self,
        ticket: SubmissionTicket,
        outcome: Result<Vec<RecognitionResult>, SubmitError>,
    ) -> Completion {
        let anchor = match self.state {
            SubmissionState::Submitting {
                ticket: current,
                anchor,
            } if current == ticket => anchor,
            _ => {
                warn!("discarding response for stale submission {}", ticket.0);
                return Completion::Discarded { ticket };
            }
        };

        match outcome {
            Ok(results) => {
                AnnotationManager::apply_assignments(&results, &mut self.variables);
                if self.policy == AnnotationPolicy::Replace {
                    self.annotations.clear_all();
                }
                let annotations = self.annotations.merge_results(&results, anchor, ticket.0);
                self.last_anchor = Some(anchor);
                self.state = SubmissionState::Ready;
                info!(
                    "submission {} applied: {} result(s), {} variable(s) bound",
                    ticket.0,
                    annotations.len(),
                    self.variables.len()
                );
                Completion::Applied {
                    ticket,
                    annotations,
                }
            }
            Err(error) => {
                warn!("submission {} failed: {error}", ticket.0);
                self.state = SubmissionState::Failed(error.clone());
                Completion::Failed { ticket, error }
            }
        }
    }

    /// Runs a whole submission on the calling thread.
    pub fn submit_with(&mut self, recognizer: &dyn Recognizer) -> Result<Vec<AnnotationId>, SubmitError> {
        let pending = self.begin_submit()?;
        let outcome = pending
            .request()
            .and_then(|request| recognizer.recognize(&request));
        match self.complete_submission(pending.ticket, outcome) {
            Completion::Applied { annotations, .. } => Ok(annotations),
            Completion::Failed { error, .. } => Err(error),
            // nothing can reset the session between the two calls above
            Completion::Discarded { .. } => Ok(Vec::new()),
        }
    }

    /// Hands the annotations to `typesetter` if they changed since the last
    /// refresh. Returns whether it was invoked.
    pub fn refresh(&mut self, typesetter: &mut dyn Typesetter) -> bool {
        let revision = self.annotations.revision();
        if self.typeset_revision == Some(revision) {
            return false;
        }
        debug!("typesetting {} annotation(s)", self.annotations.len());
        typesetter.typeset(self.annotations.items());
        self.typeset_revision = Some(revision);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Annotation;
    use crate::recognition::FixtureRecognizer;

    fn session() -> Session {
        Session::with_viewport(&Config::default(), 200, 150)
    }

    fn stroke(session: &mut Session, points: &[(f64, f64)]) {
        session.press(points[0].into());
        for &p in &points[1..] {
            session.move_to(p.into());
        }
        session.release();
    }

    #[test]
    fn two_strokes_yield_one_annotation_at_content_center() {
        let mut session = session();
        stroke(&mut session, &[(20.0, 20.0), (40.0, 20.0)]);
        stroke(&mut session, &[(100.0, 60.0), (110.0, 70.0), (120.0, 80.0)]);
        let expected_anchor = bbox::extract(session.surface().unwrap()).unwrap().center();

        let recognizer = FixtureRecognizer::from_json(r#"[{"expr":"2+2","result":"4","assign":false}]"#);
        let ids = session.submit_with(&recognizer).unwrap();

        assert_eq!(ids.len(), 1);
        let annotation = session.annotations().get(ids[0]).unwrap();
        assert!(annotation.markup.contains("2+2 = 4"));
        assert_eq!(annotation.position, expected_anchor);
        assert!(expected_anchor.x > 40.0 && expected_anchor.x < 100.0);
        assert!(session.variables().is_empty());
        assert_eq!(session.submission_state(), &SubmissionState::Ready);
        assert_eq!(session.anchor(), expected_anchor);
    }

    #[test]
    fn empty_surface_is_not_sent() {
        let mut session = session();
        let recognizer = FixtureRecognizer::from_json("[]");
        assert_eq!(session.submit_with(&recognizer), Err(SubmitError::EmptySurface));
        assert!(recognizer.last_request().is_none());
        assert_eq!(session.last_error(), Some(&SubmitError::EmptySurface));

        let mut no_surface = Session::new(&Config::default());
        assert_eq!(no_surface.begin_submit().unwrap_err(), SubmitError::EmptySurface);
    }

    #[test]
    fn second_submit_is_rejected_while_pending() {
        let mut session = session();
        stroke(&mut session, &[(5.0, 5.0), (30.0, 30.0)]);
        let pending = session.begin_submit().unwrap();
        assert_eq!(session.begin_submit().unwrap_err(), SubmitError::InFlight);
        assert!(session.is_submitting());

        let done = session.complete_submission(pending.ticket, Ok(Vec::new()));
        assert!(matches!(done, Completion::Applied { .. }));
        assert!(session.begin_submit().is_ok());
    }

    #[test]
    fn reset_discards_pending_response() {
        let mut session = session();
        session.variables.bind("x", "1");
        stroke(&mut session, &[(5.0, 5.0), (30.0, 30.0)]);
        session.set_mode(ToolMode::Eraser);
        session.set_width(17);
        session.set_color(Rgba([0x22, 0x8B, 0xE6, 255]));
        let tool_before = *session.tool();
        let pending = session.begin_submit().unwrap();
        assert_eq!(pending.variables.get("x"), Some("1"));

        session.reset();
        assert!(session.variables().is_empty());
        assert!(session.annotations().is_empty());
        let surface = session.surface().unwrap();
        assert_eq!(surface.dimensions(), (200, 150));
        assert_eq!(bbox::extract(surface), None);
        assert_eq!(session.tool(), &tool_before);

        let late = session.complete_submission(
            pending.ticket,
            Ok(vec![RecognitionResult::new("y", "2", true)]),
        );
        assert_eq!(late, Completion::Discarded { ticket: pending.ticket });
        assert!(session.variables().is_empty());
        assert!(session.annotations().is_empty());
        assert_eq!(session.submission_state(), &SubmissionState::Ready);

        let late_failure =
            session.complete_submission(pending.ticket, Err(SubmitError::TransportFailure("x".into())));
        assert!(matches!(late_failure, Completion::Discarded { .. }));
        assert_eq!(session.last_error(), None);
    }

    #[test]
    fn stale_ticket_cannot_complete_newer_submission() {
        let mut session = session();
        stroke(&mut session, &[(5.0, 5.0), (30.0, 30.0)]);
        let old = session.begin_submit().unwrap();
        session.reset();
        stroke(&mut session, &[(50.0, 50.0), (60.0, 60.0)]);
        let new = session.begin_submit().unwrap();
        assert_ne!(old.ticket, new.ticket);

        let stale = session.complete_submission(old.ticket, Ok(vec![RecognitionResult::new("a", "1", true)]));
        assert!(matches!(stale, Completion::Discarded { .. }));
        assert!(session.is_submitting());
        assert!(matches!(
            session.complete_submission(new.ticket, Ok(Vec::new())),
            Completion::Applied { .. }
        ));
    }

    #[test]
    fn failure_leaves_domain_state_intact() {
        let mut session = session();
        stroke(&mut session, &[(10.0, 10.0), (20.0, 20.0)]);
        let ok = FixtureRecognizer::from_results(&[RecognitionResult::new("x", "5", true)]);
        session.submit_with(&ok).unwrap();
        let surface_before = session.surface().unwrap().clone();
        let annotations_before: Vec<Annotation> = session.annotations().items().to_vec();

        let failing = FixtureRecognizer::failing(SubmitError::TransportFailure("offline".into()));
        let err = session.submit_with(&failing).unwrap_err();
        assert_eq!(err, SubmitError::TransportFailure("offline".into()));
        assert_eq!(session.annotations().items(), annotations_before.as_slice());
        assert_eq!(session.variables().get("x"), Some("5"));
        assert_eq!(session.surface().unwrap(), &surface_before);

        let malformed = FixtureRecognizer::from_json("{\"data\": 3}");
        assert!(matches!(
            session.submit_with(&malformed),
            Err(SubmitError::InvalidResponse(_))
        ));
        assert_eq!(session.annotations().len(), 1);

        // retry from Failed works
        session.submit_with(&ok).unwrap();
        assert_eq!(session.annotations().len(), 2);
    }

    #[test]
    fn variables_are_sent_with_next_request() {
        let mut session = session();
        stroke(&mut session, &[(10.0, 10.0), (20.0, 20.0)]);
        session
            .submit_with(&FixtureRecognizer::from_results(&[RecognitionResult::new("x", "5", true)]))
            .unwrap();

        let second = FixtureRecognizer::from_results(&[RecognitionResult::new("x+1", "6", false)]);
        session.submit_with(&second).unwrap();
        let sent = second.last_request().unwrap();
        assert_eq!(sent.dict_of_vars.get("x"), Some("5"));
    }

    #[test]
    fn drawing_after_begin_does_not_move_anchor() {
        let mut session = session();
        stroke(&mut session, &[(10.0, 10.0), (30.0, 10.0)]);
        let pending = session.begin_submit().unwrap();
        stroke(&mut session, &[(150.0, 140.0), (190.0, 140.0)]);

        let before = pending.snapshot.clone();
        let done = session.complete_submission(
            pending.ticket,
            Ok(vec![RecognitionResult::new("1", "1", false)]),
        );
        let annotations = match done {
            Completion::Applied { annotations, .. } => annotations,
            other => panic!("expected applied, got {other:?}"),
        };
        assert_eq!(session.annotations().get(annotations[0]).unwrap().position, pending.anchor);
        assert_eq!(pending.snapshot, before);
        assert_ne!(session.surface().unwrap(), &pending.snapshot);
    }

    #[test]
    fn replace_policy_drops_earlier_batches() {
        let mut config = Config::default();
        config.layout.policy = AnnotationPolicy::Replace;
        let mut session = Session::with_viewport(&config, 100, 100);
        stroke(&mut session, &[(10.0, 10.0), (20.0, 20.0)]);
        let two = FixtureRecognizer::from_results(&[
            RecognitionResult::new("1+1", "2", false),
            RecognitionResult::new("2+2", "4", false),
        ]);
        session.submit_with(&two).unwrap();
        assert_eq!(session.annotations().len(), 2);
        session
            .submit_with(&FixtureRecognizer::from_results(&[RecognitionResult::new("3", "3", false)]))
            .unwrap();
        assert_eq!(session.annotations().len(), 1);
        assert_eq!(session.annotations().latest_batch(), Some(2));
    }

    #[test]
    fn tool_changes_apply_on_next_press() {
        let mut session = session();
        session.press(Point::new(10.0, 10.0));
        session.set_mode(ToolMode::Eraser);
        assert!(session.select_swatch(1));
        session.move_to(Point::new(10.0, 10.0));
        session.leave();
        assert!(!session.is_drawing());
        assert_eq!(session.surface().unwrap().get_pixel(10, 10)[3], 255);
        assert_eq!(session.toggle_mode(), ToolMode::Pencil);
        assert_eq!(session.set_width(99), 10);
        assert!(!session.select_swatch(99));
    }

    #[derive(Default)]
    struct CountingTypesetter {
        calls: usize,
        last: Vec<String>,
    }

    impl Typesetter for CountingTypesetter {
        fn typeset(&mut self, annotations: &[Annotation]) {
            self.calls += 1;
            self.last = annotations.iter().map(|a| a.markup.clone()).collect();
        }
    }

    #[test]
    fn refresh_only_when_annotations_change() {
        let mut session = session();
        let mut typesetter = CountingTypesetter::default();
        assert!(session.refresh(&mut typesetter));
        assert!(!session.refresh(&mut typesetter));

        stroke(&mut session, &[(10.0, 10.0), (20.0, 20.0)]);
        let ids = session
            .submit_with(&FixtureRecognizer::from_results(&[RecognitionResult::new("2+2", "4", false)]))
            .unwrap();
        assert!(session.refresh(&mut typesetter));
        assert_eq!(typesetter.last, vec![r"\(\LARGE{2+2 = 4}\)".to_string()]);

        assert!(session.reposition(ids[0], Point::new(1.0, 1.0)));
        assert!(session.refresh(&mut typesetter));
        session.reset();
        assert!(session.refresh(&mut typesetter));
        assert!(typesetter.last.is_empty());
        assert_eq!(typesetter.calls, 4);
    }
}
