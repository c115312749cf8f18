//! Generic repositories over the session bound into a [`SessionProvider`].
//!
//! A repository never owns transaction lifecycle: it resolves the current
//! session on every call and passes the operation through to the session's
//! [`EntityStore`] surface.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::provider::SessionProvider;
use crate::{DalError, DalResult, ExceptionTranslator};

/// Domain entity stored in a named entity set.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    type Key: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned;

    /// Name of the entity set (table).
    const SET: &'static str;

    fn key(&self) -> Self::Key;
}

/// Query and mutation surface a session offers to repositories.
///
/// `track_*` changes are visible to the session's own reads right away and
/// reach storage on flush. `execute_*` operations bypass change tracking and
/// write straight into the session's current write scope.
pub trait EntityStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn load_all<T: Entity>(&self) -> Result<Vec<T>, Self::Error>;

    fn find<T: Entity>(&self, key: &T::Key) -> Result<Option<T>, Self::Error>;

    /// Tracks a new entity. Fails if the key already exists.
    fn track_add<T: Entity>(&self, entity: T) -> Result<(), Self::Error>;

    /// Tracks an insert or a replacement.
    fn track_upsert<T: Entity>(&self, entity: T) -> Result<(), Self::Error>;

    /// Tracks a replacement. Fails if the key does not exist.
    fn track_update<T: Entity>(&self, entity: T) -> Result<(), Self::Error>;

    /// Tracks a removal. Fails if the key does not exist.
    fn track_remove<T: Entity>(&self, key: &T::Key) -> Result<(), Self::Error>;

    fn execute_delete<T: Entity>(&self, filter: &dyn Fn(&T) -> bool) -> Result<usize, Self::Error>;

    fn execute_update<T: Entity>(
        &self,
        filter: &dyn Fn(&T) -> bool,
        updater: &dyn Fn(T) -> T,
    ) -> Result<usize, Self::Error>;
}

/// One page of a query result. Page numbers start at 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_number: usize,
    pub page_size: usize,
    pub total_count: usize,
}

impl<T> Page<T> {
    /// Cuts page `page_number` out of an already ordered result.
    pub(crate) fn from_ordered(all: Vec<T>, page_number: usize, page_size: usize) -> Self {
        let total_count = all.len();
        let items = all
            .into_iter()
            .skip(page_number.saturating_sub(1).saturating_mul(page_size))
            .take(page_size)
            .collect();
        Self {
            items,
            page_number,
            page_size,
            total_count,
        }
    }

    /// Number of pages; 0 when `page_size` is 0.
    pub fn page_count(&self) -> usize {
        if self.page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(self.page_size)
    }

    pub fn has_previous(&self) -> bool {
        self.page_number > 1
    }

    pub fn has_next(&self) -> bool {
        self.page_number < self.page_count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub(crate) fn check_paging(page_number: usize, page_size: usize) -> DalResult<()> {
    if page_number == 0 || page_size == 0 {
        return Err(DalError::InvalidArgument(format!(
            "page number and page size must be positive, got page {page_number} of size {page_size}"
        )));
    }
    Ok(())
}

/// Repository for entities of type `T`.
pub struct Repository<T, S> {
    provider: Arc<SessionProvider<S>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T, S> Clone for Repository<T, S> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity, S: EntityStore> Repository<T, S> {
    pub fn new(provider: Arc<SessionProvider<S>>) -> Self {
        Self {
            provider,
            _entity: PhantomData,
        }
    }

    pub fn set_name(&self) -> &'static str {
        T::SET
    }

    fn call<R>(&self, op: impl FnOnce(&S) -> Result<R, S::Error>) -> DalResult<R> {
        let session = self.provider.current_session()?;
        ExceptionTranslator::wrap_call(|| op(session.as_ref()))
    }

    pub fn get_all(&self) -> DalResult<Vec<T>> {
        self.call(|s| s.load_all::<T>())
    }

    pub fn find(&self, key: &T::Key) -> DalResult<Option<T>> {
        self.call(|s| s.find::<T>(key))
    }

    pub fn add(&self, entity: T) -> DalResult<usize> {
        self.call(|s| s.track_add(entity)).map(|_| 1)
    }

    pub fn add_range<I>(&self, entities: I) -> DalResult<usize>
    where
        I: IntoIterator<Item = T>,
    {
        self.call(|s| {
            let mut count = 0;
            for entity in entities {
                s.track_add(entity)?;
                count += 1;
            }
            Ok(count)
        })
    }

    pub fn add_or_update(&self, entity: T) -> DalResult<usize> {
        self.call(|s| s.track_upsert(entity)).map(|_| 1)
    }

    pub fn add_or_update_range<I>(&self, entities: I) -> DalResult<usize>
    where
        I: IntoIterator<Item = T>,
    {
        self.call(|s| {
            let mut count = 0;
            for entity in entities {
                s.track_upsert(entity)?;
                count += 1;
            }
            Ok(count)
        })
    }

    pub fn update(&self, entity: T) -> DalResult<usize> {
        self.call(|s| s.track_update(entity)).map(|_| 1)
    }

    pub fn delete(&self, entity: &T) -> DalResult<usize> {
        self.delete_by_key(&entity.key())
    }

    pub fn delete_by_key(&self, key: &T::Key) -> DalResult<usize> {
        self.call(|s| s.track_remove::<T>(key)).map(|_| 1)
    }

    pub fn delete_range<'a, I>(&self, entities: I) -> DalResult<usize>
    where
        I: IntoIterator<Item = &'a T>,
    {
        self.call(|s| {
            let mut count = 0;
            for entity in entities {
                s.track_remove::<T>(&entity.key())?;
                count += 1;
            }
            Ok(count)
        })
    }

    /// Tracks removal of every entity matching `filter`.
    pub fn delete_all<P>(&self, filter: P) -> DalResult<usize>
    where
        P: Fn(&T) -> bool,
    {
        self.call(|s| {
            let doomed: Vec<T> = s.load_all::<T>()?.into_iter().filter(|e| filter(e)).collect();
            for entity in &doomed {
                s.track_remove::<T>(&entity.key())?;
            }
            Ok(doomed.len())
        })
    }

    pub fn count(&self) -> DalResult<usize> {
        self.call(|s| s.load_all::<T>().map(|all| all.len()))
    }

    pub fn count_where<P>(&self, filter: P) -> DalResult<usize>
    where
        P: Fn(&T) -> bool,
    {
        self.call(|s| Ok(s.load_all::<T>()?.iter().filter(|e| filter(*e)).count()))
    }

    pub fn query<P>(&self, filter: P) -> DalResult<Vec<T>>
    where
        P: Fn(&T) -> bool,
    {
        self.call(|s| Ok(s.load_all::<T>()?.into_iter().filter(|e| filter(e)).collect()))
    }

    pub fn query_ordered<P, O>(&self, filter: P, order: O) -> DalResult<Vec<T>>
    where
        P: Fn(&T) -> bool,
        O: FnMut(&T, &T) -> Ordering,
    {
        let mut items = self.query(filter)?;
        items.sort_by(order);
        Ok(items)
    }

    /// Runs `callback` over every entity in the set.
    pub fn query_with<R, C>(&self, callback: C) -> DalResult<R>
    where
        C: FnOnce(Vec<T>) -> R,
    {
        self.get_all().map(callback)
    }

    pub fn paged<P, O>(
        &self,
        page_number: usize,
        page_size: usize,
        filter: P,
        order: O,
    ) -> DalResult<Page<T>>
    where
        P: Fn(&T) -> bool,
        O: FnMut(&T, &T) -> Ordering,
    {
        check_paging(page_number, page_size)?;
        let all = self.query_ordered(filter, order)?;
        Ok(Page::from_ordered(all, page_number, page_size))
    }

    /// Deletes matching entities right away, bypassing change tracking.
    pub fn delete_immediately<P>(&self, filter: P) -> DalResult<usize>
    where
        P: Fn(&T) -> bool,
    {
        self.call(|s| s.execute_delete::<T>(&filter))
    }

    /// Rewrites matching entities right away, bypassing change tracking.
    pub fn update_immediately<P, U>(&self, filter: P, updater: U) -> DalResult<usize>
    where
        P: Fn(&T) -> bool,
        U: Fn(T) -> T,
    {
        self.call(|s| s.execute_update::<T>(&filter, &updater))
    }
}
