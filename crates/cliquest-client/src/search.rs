//! Client-side search over already-loaded items.
//!
//! Matching is case-insensitive substring search over each item's text
//! fields. [`DebouncedSearch`] delays evaluation until input has been quiet
//! for the configured interval, so typing a query runs it once.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::trace;

/// An item with text fields a query can match.
pub trait Searchable {
    fn search_fields(&self) -> Vec<&str>;
}

pub fn matches_query<T: Searchable + ?Sized>(item: &T, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    item.search_fields()
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
}

/// Items matching `query`, in their original order. A blank query matches
/// everything.
pub fn filter_items<T: Searchable + Clone>(items: &[T], query: &str) -> Vec<T> {
    items
        .iter()
        .filter(|item| matches_query(*item, query))
        .cloned()
        .collect()
}

/// Background search evaluated after input inactivity.
pub struct DebouncedSearch<R> {
    input: mpsc::UnboundedSender<String>,
    results: watch::Receiver<R>,
    task: JoinHandle<()>,
}

impl<R: Clone + Send + Sync + 'static> DebouncedSearch<R> {
    pub fn spawn<F>(delay: Duration, initial: R, mut evaluate: F) -> Self
    where
        F: FnMut(&str) -> R + Send + 'static,
    {
        let (input, mut queries) = mpsc::unbounded_channel::<String>();
        let (results_tx, results) = watch::channel(initial);

        let task = tokio::spawn(async move {
            while let Some(mut query) = queries.recv().await {
                loop {
                    tokio::select! {
                        next = queries.recv() => match next {
                            Some(newer) => query = newer,
                            None => {
                                let _ = results_tx.send(evaluate(&query));
                                return;
                            }
                        },
                        _ = tokio::time::sleep(delay) => break,
                    }
                }
                trace!(query = %query, "Running search");
                if results_tx.send(evaluate(&query)).is_err() {
                    break;
                }
            }
        });

        Self {
            input,
            results,
            task,
        }
    }

    /// Feed the latest input; restarts the quiet period.
    pub fn input(&self, query: impl Into<String>) {
        let _ = self.input.send(query.into());
    }

    pub fn results(&self) -> watch::Receiver<R> {
        self.results.clone()
    }

    pub fn current(&self) -> R {
        self.results.borrow().clone()
    }
}

impl<R> Drop for DebouncedSearch<R> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Debug, PartialEq)]
    struct Note(&'static str, &'static str);

    impl Searchable for Note {
        fn search_fields(&self) -> Vec<&str> {
            vec![self.0, self.1]
        }
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        let notes = vec![Note("Roadmap", "Q3 planning"), Note("Bug", "Login fails")];
        assert_eq!(filter_items(&notes, "LOGIN"), vec![notes[1].clone()]);
        assert_eq!(filter_items(&notes, "  ").len(), 2);
        assert!(filter_items(&notes, "zebra").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_input_evaluates_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let search = DebouncedSearch::spawn(Duration::from_millis(300), String::new(), move |q| {
            counter.fetch_add(1, Ordering::SeqCst);
            q.to_string()
        });

        search.input("r");
        search.input("ro");
        search.input("roa");
        tokio::time::sleep(Duration::from_millis(100)).await;
        search.input("road");
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(search.current(), "road");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_between_queries_runs_each() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let search = DebouncedSearch::spawn(Duration::from_millis(300), 0usize, move |q| {
            counter.fetch_add(1, Ordering::SeqCst);
            q.len()
        });

        search.input("a");
        tokio::time::sleep(Duration::from_millis(350)).await;
        search.input("abc");
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(search.current(), 3);
    }
}
