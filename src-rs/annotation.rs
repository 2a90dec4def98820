//! Result annotations placed over the drawing.
//!
//! Annotations keep insertion order. Each batch of results is laid out in a
//! column below the anchor so simultaneous results do not cover each other.

use serde::Serialize;

use crate::geom::Point;
use crate::recognition::RecognitionResult;
use crate::variables::VariableContext;

/// Vertical distance between results of one batch.
pub const DEFAULT_STEP: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct AnnotationId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub id: AnnotationId,
    /// Typesetting input, e.g. `\(\LARGE{2+2 = 4}\)`.
    pub markup: String,
    pub expression: String,
    pub answer: String,
    pub position: Point,
    /// Submission the annotation came from.
    pub batch: u64,
}

impl Annotation {
    /// `expression = answer` without typesetting delimiters.
    pub fn plain_text(&self) -> String {
        format!("{} = {}", self.expression, self.answer)
    }
}

pub fn markup_for(expression: &str, answer: &str) -> String {
    format!("\\(\\LARGE{{{expression} = {answer}}}\\)")
}

#[derive(Debug)]
pub struct AnnotationManager {
    items: Vec<Annotation>,
    next_id: u64,
    step: f64,
    latest_batch: Option<u64>,
    revision: u64,
}

impl Default for AnnotationManager {
    fn default() -> Self {
        Self::new(DEFAULT_STEP)
    }
}

impl AnnotationManager {
    pub fn new(step: f64) -> Self {
        Self {
            items: Vec::new(),
            next_id: 1,
            step,
            latest_batch: None,
            revision: 0,
        }
    }

    /// Appends one annotation per result, stacked downward from `anchor`.
    pub fn merge_results(
        &mut self,
        results: &[RecognitionResult],
        anchor: Point,
        batch: u64,
    ) -> Vec<AnnotationId> {
        let mut ids = Vec::with_capacity(results.len());
        for (index, result) in results.iter().enumerate() {
            let id = AnnotationId(self.next_id);
            self.next_id += 1;
            self.items.push(Annotation {
                id,
                markup: markup_for(&result.expression, &result.answer),
                expression: result.expression.clone(),
                answer: result.answer.clone(),
                position: anchor.offset(0.0, index as f64 * self.step),
                batch,
            });
            ids.push(id);
        }
        self.latest_batch = Some(batch);
        self.revision += 1;
        ids
    }

    /// Binds every assignment result into `context`, later bindings winning.
    pub fn apply_assignments(results: &[RecognitionResult], context: &mut VariableContext) {
        for result in results.iter().filter(|r| r.is_assignment) {
            context.bind(result.expression.clone(), result.answer.clone());
        }
    }

    /// Moves one annotation. Returns false for an unknown id.
    pub fn reposition(&mut self, id: AnnotationId, position: Point) -> bool {
        match self.items.iter_mut().find(|a| a.id == id) {
            Some(annotation) => {
                annotation.position = position;
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&mut self) {
        self.items.clear();
        self.latest_batch = None;
        self.revision += 1;
    }

    pub fn clear_batch_indicator(&mut self) {
        self.latest_batch = None;
    }

    pub fn latest_batch(&self) -> Option<u64> {
        self.latest_batch
    }

    /// Bumped on every change to the list or a position.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.items.iter().find(|a| a.id == id)
    }

    pub fn items(&self) -> &[Annotation] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
