use std::collections::{HashSet, VecDeque};

use url::Url;

/// Per-run crawl frontier: FIFO queue plus visited/scheduled sets.
/// A URL enters the queue at most once per run, unless its fetch failed
/// and it is explicitly requeued.
#[derive(Debug)]
pub struct Frontier {
    visited: HashSet<Url>,
    scheduled: HashSet<Url>,
    failed: HashSet<Url>,
    queue: VecDeque<(Url, u8)>,
    max_depth: u8,
}

impl Frontier {
    pub fn new(max_depth: u8) -> Self {
        Self {
            visited: HashSet::new(),
            scheduled: HashSet::new(),
            failed: HashSet::new(),
            queue: VecDeque::new(),
            max_depth,
        }
    }

    /// Queues `url` unless it was already scheduled this run or is too deep.
    pub fn push(&mut self, url: Url, depth: u8) -> bool {
        if depth > self.max_depth || self.scheduled.contains(&url) {
            return false;
        }
        self.scheduled.insert(url.clone());
        self.queue.push_back((url, depth));
        true
    }

    /// Queues a manually added URL. Unlike `push`, a URL whose fetch failed
    /// earlier in the run is accepted again.
    pub fn requeue(&mut self, url: Url, depth: u8) -> bool {
        if self.failed.remove(&url) {
            self.scheduled.remove(&url);
        }
        self.push(url, depth)
    }

    /// Up to `n` unvisited items, in queue order.
    pub fn next_batch(&mut self, n: usize) -> Vec<(Url, u8)> {
        let mut batch = Vec::with_capacity(n);
        while batch.len() < n {
            let Some((url, depth)) = self.queue.pop_front() else {
                break;
            };
            if depth <= self.max_depth && !self.visited.contains(&url) {
                batch.push((url, depth));
            }
        }
        batch
    }

    pub fn mark_visited(&mut self, url: Url) {
        self.visited.insert(url);
    }

    /// Records a failed fetch; links to it are still ignored, `requeue` is not.
    pub fn mark_failed(&mut self, url: Url) {
        self.failed.insert(url);
    }

    /// Drops everything still queued; returns how many items were dropped.
    pub fn drain(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        n
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn visited(&self) -> usize {
        self.visited.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse("https://example.com/help/").unwrap().join(path).unwrap()
    }

    #[test]
    fn url_scheduled_once_per_run() {
        let mut f = Frontier::new(3);
        assert!(f.push(url("a.html"), 0));
        assert!(!f.push(url("a.html"), 1));
        let batch = f.next_batch(10);
        assert_eq!(batch.len(), 1);
        f.mark_visited(batch[0].0.clone());
        assert!(!f.push(url("a.html"), 2));
        assert!(f.is_empty());
        assert_eq!(f.visited(), 1);
    }

    #[test]
    fn depth_limit() {
        let mut f = Frontier::new(0);
        assert!(f.push(url("seed.html"), 0));
        assert!(!f.push(url("child.html"), 1));
        assert_eq!(f.queued(), 1);
    }

    #[test]
    fn batches_keep_fifo_order() {
        let mut f = Frontier::new(5);
        for name in ["a.html", "b.html", "c.html"] {
            f.push(url(name), 1);
        }
        let first: Vec<_> = f.next_batch(2).into_iter().map(|(u, _)| u).collect();
        assert_eq!(first, vec![url("a.html"), url("b.html")]);
        assert_eq!(f.next_batch(2).len(), 1);
        assert!(f.next_batch(2).is_empty());
    }

    #[test]
    fn failed_url_can_be_requeued_once() {
        let mut f = Frontier::new(3);
        f.push(url("broken.html"), 1);
        let (broken, _) = f.next_batch(1).remove(0);
        f.mark_failed(broken.clone());

        assert!(!f.push(broken.clone(), 2));
        assert!(f.requeue(broken.clone(), 0));
        assert!(!f.requeue(broken.clone(), 0));
        assert_eq!(f.next_batch(5), vec![(broken, 0)]);
    }

    #[test]
    fn requeue_ignores_visited_urls() {
        let mut f = Frontier::new(3);
        f.push(url("a.html"), 0);
        let (a, _) = f.next_batch(1).remove(0);
        f.mark_visited(a.clone());
        assert!(!f.requeue(a, 0));
        assert!(f.is_empty());
    }

    #[test]
    fn drain_empties_queue() {
        let mut f = Frontier::new(5);
        f.push(url("a.html"), 0);
        f.push(url("b.html"), 0);
        assert_eq!(f.drain(), 2);
        assert!(f.is_empty());
    }
}
