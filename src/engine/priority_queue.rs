//! Activity-ordered priority queue over dense ids, used for both the Boolean
//! and the arithmetic decision heuristics. A binary max-heap with stored
//! positions so that activity bumps can reposition queued entries.

use rand::rngs::SmallRng;
use rand::Rng;

use crate::sable_assert_moderate;
use crate::sable_assert_simple;

const MAX_SCORE_BEFORE_SCALING: f64 = 1e100;
const SCALING_FACTOR: f64 = 1e-100;

#[derive(Debug)]
pub(crate) struct VariablePriorityQueue {
    heap: Vec<usize>,
    /// Position of each id in `heap`, `None` when not queued.
    positions: Vec<Option<usize>>,
    scores: Vec<f64>,
    score_max: f64,
    score_increase: f64,
    decay_factor: f64,
}

impl VariablePriorityQueue {
    pub(crate) fn new(score_increase: f64, decay_factor: f64) -> Self {
        sable_assert_simple!(decay_factor > 0.0 && decay_factor <= 1.0);
        VariablePriorityQueue {
            heap: Vec::new(),
            positions: Vec::new(),
            scores: Vec::new(),
            score_max: 1.0,
            score_increase,
            decay_factor,
        }
    }

    /// Register a new id; it starts at the maximum score seen so far and is
    /// enqueued immediately.
    pub(crate) fn new_entry(&mut self, id: usize) {
        if id >= self.scores.len() {
            self.scores.resize(id + 1, 0.0);
            self.positions.resize(id + 1, None);
        }
        self.scores[id] = self.score_max;
        self.enqueue(id);
    }

    pub(crate) fn in_queue(&self, id: usize) -> bool {
        self.positions.get(id).is_some_and(Option::is_some)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn score(&self, id: usize) -> f64 {
        self.scores[id]
    }

    pub(crate) fn enqueue(&mut self, id: usize) {
        sable_assert_moderate!(id < self.scores.len());
        if self.in_queue(id) {
            return;
        }
        let position = self.heap.len();
        self.heap.push(id);
        self.positions[id] = Some(position);
        self.sift_up(position);
    }

    /// Remove and return the id with the highest score.
    pub(crate) fn pop(&mut self) -> usize {
        sable_assert_simple!(!self.heap.is_empty());
        self.remove_at(0)
    }

    /// Remove and return a uniformly random queued id.
    pub(crate) fn pop_random(&mut self, rng: &mut SmallRng) -> usize {
        sable_assert_simple!(!self.heap.is_empty());
        let position = rng.gen_range(0..self.heap.len());
        self.remove_at(position)
    }

    /// Bump the score of an id, repositioning it if queued; rescales all
    /// scores when they grow too large.
    pub(crate) fn bump(&mut self, id: usize, amount: f64) {
        sable_assert_moderate!(id < self.scores.len());
        let new_score = self.scores[id] + amount * self.score_increase;
        self.scores[id] = new_score;
        if new_score > self.score_max {
            self.score_max = new_score;
        }

        if let Some(position) = self.positions[id] {
            self.sift_up(position);
        }

        if new_score > MAX_SCORE_BEFORE_SCALING {
            for score in &mut self.scores {
                *score *= SCALING_FACTOR;
            }
            self.score_max *= SCALING_FACTOR;
            self.score_increase *= SCALING_FACTOR;
        }
    }

    /// Decay: future bumps weigh more relative to the current scores.
    pub(crate) fn decay(&mut self) {
        self.score_increase /= self.decay_factor;
    }

    fn remove_at(&mut self, position: usize) -> usize {
        let id = self.heap[position];
        let last = self.heap.len() - 1;
        self.heap.swap(position, last);
        self.positions[self.heap[position]] = Some(position);
        let _ = self.heap.pop();
        self.positions[id] = None;
        if position < self.heap.len() {
            self.sift_down(position);
            self.sift_up(position.min(self.heap.len() - 1));
        }
        id
    }

    fn better(&self, a: usize, b: usize) -> bool {
        self.scores[a] > self.scores[b]
    }

    fn sift_up(&mut self, mut position: usize) {
        while position > 0 {
            let parent = (position - 1) / 2;
            if !self.better(self.heap[position], self.heap[parent]) {
                break;
            }
            self.heap.swap(position, parent);
            self.positions[self.heap[position]] = Some(position);
            self.positions[self.heap[parent]] = Some(parent);
            position = parent;
        }
    }

    fn sift_down(&mut self, mut position: usize) {
        loop {
            let left = 2 * position + 1;
            let right = 2 * position + 2;
            let mut largest = position;
            if left < self.heap.len() && self.better(self.heap[left], self.heap[largest]) {
                largest = left;
            }
            if right < self.heap.len() && self.better(self.heap[right], self.heap[largest]) {
                largest = right;
            }
            if largest == position {
                break;
            }
            self.heap.swap(position, largest);
            self.positions[self.heap[position]] = Some(position);
            self.positions[self.heap[largest]] = Some(largest);
            position = largest;
        }
    }
}
