use std::collections::VecDeque;
use std::fmt::Debug;

use quire_types::{ResourceId, TxScope};

use crate::error::IndexResult;
use crate::shadow::{ShadowIndex, Window};

/// Lazily paginated read of one subject's tuples.
///
/// Each page is a fresh query keyed on the last tuple returned, so the
/// iterator never holds the index lock between pages. Once an error has
/// been yielded the iterator ends.
pub struct Paged<'a, T> {
    index: &'a ShadowIndex<T>,
    tx: Option<TxScope>,
    subject: ResourceId,
    window: Window,
    page_size: usize,
    start: Option<T>,
    cursor: Option<T>,
    buffer: VecDeque<T>,
    exhausted: bool,
}

impl<'a, T> Paged<'a, T>
where
    T: Clone + Ord + Debug + Send + Sync,
{
    pub(crate) fn new(
        index: &'a ShadowIndex<T>,
        tx: Option<TxScope>,
        subject: ResourceId,
        window: Window,
        page_size: usize,
    ) -> Self {
        Self {
            index,
            tx,
            subject,
            window,
            page_size,
            start: None,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Begin the read strictly after `tuple`.
    pub fn starting_after(mut self, tuple: T) -> Self {
        self.start = Some(tuple.clone());
        self.cursor = Some(tuple);
        self
    }

    /// Start again from where the read began.
    pub fn restart(&mut self) {
        self.cursor = self.start.clone();
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fetch(&mut self) -> IndexResult<()> {
        let page = self.index.page(
            self.tx.as_ref(),
            &self.subject,
            self.window,
            self.cursor.as_ref(),
            self.page_size,
        )?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<T> Iterator for Paged<'_, T>
where
    T: Clone + Ord + Debug + Send + Sync,
{
    type Item = IndexResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let next = self.buffer.pop_front()?;
        self.cursor = Some(next.clone());
        Some(Ok(next))
    }
}
