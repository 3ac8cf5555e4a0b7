//! Symbol bookkeeping: the depth-book registry and the subscription set.
//!
//! Both are small mutex-guarded maps. Lookups are concurrent, creation is
//! serialized, and entries are never removed. Iteration always returns a
//! snapshot copy so callers can hold results across further insertions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::depth::DepthBook;

/// Symbol → shared depth book. Books live until process exit.
#[derive(Debug, Default)]
pub struct BookRegistry {
    books: Mutex<HashMap<String, Arc<DepthBook>>>,
}

impl BookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the book for `symbol`, creating an empty one on first use.
    pub fn get_or_create(&self, symbol: &str) -> Arc<DepthBook> {
        let mut books = self.books.lock();
        if let Some(book) = books.get(symbol) {
            return Arc::clone(book);
        }
        debug!(symbol, "created depth book");
        let book = Arc::new(DepthBook::new());
        books.insert(symbol.to_string(), Arc::clone(&book));
        book
    }

    /// Strict lookup; `None` when no book exists yet.
    pub fn get(&self, symbol: &str) -> Option<Arc<DepthBook>> {
        self.books.lock().get(symbol).cloned()
    }

    /// Snapshot of all tracked books.
    pub fn all(&self) -> Vec<(String, Arc<DepthBook>)> {
        self.books
            .lock()
            .iter()
            .map(|(s, b)| (s.clone(), Arc::clone(b)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.books.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.lock().is_empty()
    }
}

/// Set of subscribed symbols. Insertion is idempotent.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    symbols: Mutex<HashSet<String>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symbol; returns `true` iff it was newly added.
    pub fn add(&self, symbol: &str) -> bool {
        let mut symbols = self.symbols.lock();
        let added = symbols.insert(symbol.to_string());
        if added {
            debug!(symbol, total = symbols.len(), "subscribed symbol");
        }
        added
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.lock().contains(symbol)
    }

    /// Snapshot copy of the membership.
    pub fn symbols(&self) -> Vec<String> {
        self.symbols.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.lock().is_empty()
    }
}
