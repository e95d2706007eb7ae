//! Complete enumeration of a bucket over page-at-a-time backends.
//!
//! A list call starts without a continuation token, fetches a page, decodes
//! and accumulates its items, and keeps fetching while the backend hands back a
//! token. Any decode failure aborts the whole call, so callers never see a
//! partial result.

use async_trait::async_trait;

use crate::entry::Entry;
use crate::errors::{ErrorKind, NoSqlError, NoSqlResult};

/// Page size used when [`Options::page_size`](crate::options::Options) is not set.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Opaque position after the last item of a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContinuationToken(pub Vec<u8>);

impl ContinuationToken {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// One page of native items plus the token for the next page, if any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<ContinuationToken>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Page { items, next: None }
    }
}

/// Asynchronous page producer, implemented by network backends.
#[async_trait]
pub trait PageSource: Send {
    type Item: Send;

    async fn fetch(&mut self, token: Option<ContinuationToken>) -> NoSqlResult<Page<Self::Item>>;

    /// Converts a native item into an entry. `Ok(None)` skips internal items.
    fn decode(&self, item: Self::Item) -> NoSqlResult<Option<Entry>>;
}

/// Synchronous page producer, implemented by embedded backends that read from a
/// snapshot they must not hold across an `.await`.
pub trait PageReader {
    type Item;

    fn read_page(&mut self, token: Option<ContinuationToken>) -> NoSqlResult<Page<Self::Item>>;

    fn decode(&self, item: Self::Item) -> NoSqlResult<Option<Entry>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ListState {
    Start,
    Fetching(Option<ContinuationToken>),
    Accumulating,
    Done,
}

/// The list state machine, shared by the async and blocking loops.
#[derive(Debug)]
pub struct Paginator {
    state: ListState,
    last_token: Option<ContinuationToken>,
    entries: Vec<Entry>,
    pages: usize,
}

impl Default for Paginator {
    fn default() -> Self {
        Paginator::new()
    }
}

impl Paginator {
    pub fn new() -> Self {
        Paginator {
            state: ListState::Start,
            last_token: None,
            entries: Vec::new(),
            pages: 0,
        }
    }

    /// Moves to `Fetching` and returns the token to fetch with, or `None` once done.
    pub fn next_fetch(&mut self) -> Option<Option<ContinuationToken>> {
        match &self.state {
            ListState::Start => {
                self.state = ListState::Fetching(None);
                Some(None)
            }
            ListState::Fetching(token) => Some(token.clone()),
            ListState::Accumulating | ListState::Done => None,
        }
    }

    /// Decodes and accumulates a fetched page, then decides the next state.
    pub fn accumulate<T, F>(&mut self, page: Page<T>, mut decode: F) -> NoSqlResult<()>
    where
        F: FnMut(T) -> NoSqlResult<Option<Entry>>,
    {
        if !matches!(self.state, ListState::Fetching(_)) {
            return Err(NoSqlError::new(
                "page accumulated outside of a fetch",
                ErrorKind::Internal,
            ));
        }
        self.state = ListState::Accumulating;
        self.pages += 1;

        for item in page.items {
            if let Some(entry) = decode(item)? {
                self.entries.push(entry);
            }
        }

        self.state = match page.next {
            Some(token) => {
                if self.last_token.as_ref() == Some(&token) {
                    log::error!("Backend returned the same continuation token twice");
                    return Err(NoSqlError::new(
                        "listing did not advance: repeated continuation token",
                        ErrorKind::Backend,
                    ));
                }
                self.last_token = Some(token.clone());
                ListState::Fetching(Some(token))
            }
            None => ListState::Done,
        };
        Ok(())
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn finish(self) -> NoSqlResult<Vec<Entry>> {
        match self.state {
            ListState::Done => Ok(self.entries),
            _ => Err(NoSqlError::new(
                "listing finished before the last page",
                ErrorKind::Internal,
            )),
        }
    }
}

/// Drains an async page source.
pub async fn list_all<S>(source: &mut S) -> NoSqlResult<Vec<Entry>>
where
    S: PageSource + ?Sized,
{
    let mut paginator = Paginator::new();
    while let Some(token) = paginator.next_fetch() {
        let page = source.fetch(token).await?;
        paginator.accumulate(page, |item| source.decode(item))?;
    }
    paginator.finish()
}

/// Drains a blocking page reader.
pub fn list_all_blocking<R>(reader: &mut R) -> NoSqlResult<Vec<Entry>>
where
    R: PageReader + ?Sized,
{
    let mut paginator = Paginator::new();
    while let Some(token) = paginator.next_fetch() {
        let page = reader.read_page(token)?;
        paginator.accumulate(page, |item| reader.decode(item))?;
    }
    paginator.finish()
}

/// Builds a keyset page from an ordered iterator that already starts after the
/// previous token: takes `page_size` items and, if more remain, uses the last
/// key as the next token.
pub fn keyset_page<I>(items: I, page_size: usize) -> NoSqlResult<Page<(Vec<u8>, Vec<u8>)>>
where
    I: Iterator<Item = NoSqlResult<(Vec<u8>, Vec<u8>)>>,
{
    let page_size = page_size.max(1);
    let mut page = Vec::with_capacity(page_size.min(DEFAULT_PAGE_SIZE));
    let mut more = false;
    for item in items {
        if page.len() == page_size {
            more = true;
            break;
        }
        page.push(item?);
    }

    let next = if more {
        page.last().map(|(key, _)| ContinuationToken(key.clone()))
    } else {
        None
    };
    Ok(Page { items: page, next })
}
