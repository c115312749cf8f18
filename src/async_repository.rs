//! Asynchronous repositories.
//!
//! [`AsyncRepository`] mirrors [`crate::Repository`] for sessions whose
//! storage calls suspend, such as [`crate::postgres::PgSession`]. It resolves
//! the session from the provider on every call, exactly like the synchronous
//! repository.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::provider::SessionProvider;
use crate::repository::{check_paging, Entity, Page};
use crate::{DalResult, ExceptionTranslator};

/// Asynchronous counterpart of [`crate::EntityStore`].
#[async_trait]
pub trait AsyncEntityStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn load_all<T: Entity>(&self) -> Result<Vec<T>, Self::Error>;

    async fn find<T: Entity>(&self, key: &T::Key) -> Result<Option<T>, Self::Error>;

    /// Fails if the key already exists.
    async fn track_add<T: Entity>(&self, entity: T) -> Result<(), Self::Error>;

    async fn track_upsert<T: Entity>(&self, entity: T) -> Result<(), Self::Error>;

    /// Fails if the key does not exist.
    async fn track_update<T: Entity>(&self, entity: T) -> Result<(), Self::Error>;

    /// Fails if the key does not exist.
    async fn track_remove<T: Entity>(&self, key: &T::Key) -> Result<(), Self::Error>;

    async fn execute_delete<T: Entity>(
        &self,
        filter: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
    ) -> Result<usize, Self::Error>;

    async fn execute_update<T: Entity>(
        &self,
        filter: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
        updater: &(dyn Fn(T) -> T + Send + Sync),
    ) -> Result<usize, Self::Error>;
}

/// Asynchronous repository for entities of type `T`.
pub struct AsyncRepository<T, S> {
    provider: Arc<SessionProvider<S>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T, S> Clone for AsyncRepository<T, S> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity, S: AsyncEntityStore> AsyncRepository<T, S> {
    /// Create a new repository reading sessions from `provider`.
    pub fn new(provider: Arc<SessionProvider<S>>) -> Self {
        Self {
            provider,
            _entity: PhantomData,
        }
    }

    pub fn set_name(&self) -> &'static str {
        T::SET
    }

    fn session(&self) -> DalResult<Arc<S>> {
        self.provider.current_session()
    }

    pub async fn get_all(&self) -> DalResult<Vec<T>> {
        let session = self.session()?;
        ExceptionTranslator::wrap_future(session.load_all::<T>()).await
    }

    pub async fn find(&self, key: &T::Key) -> DalResult<Option<T>> {
        let session = self.session()?;
        ExceptionTranslator::wrap_future(session.find::<T>(key)).await
    }

    pub async fn add(&self, entity: T) -> DalResult<usize> {
        let session = self.session()?;
        ExceptionTranslator::wrap_future(session.track_add(entity)).await?;
        Ok(1)
    }

    pub async fn add_range<I>(&self, entities: I) -> DalResult<usize>
    where
        I: IntoIterator<Item = T>,
    {
        let session = self.session()?;
        let mut count = 0;
        for entity in entities {
            ExceptionTranslator::wrap_future(session.track_add(entity)).await?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn add_or_update(&self, entity: T) -> DalResult<usize> {
        let session = self.session()?;
        ExceptionTranslator::wrap_future(session.track_upsert(entity)).await?;
        Ok(1)
    }

    pub async fn add_or_update_range<I>(&self, entities: I) -> DalResult<usize>
    where
        I: IntoIterator<Item = T>,
    {
        let session = self.session()?;
        let mut count = 0;
        for entity in entities {
            ExceptionTranslator::wrap_future(session.track_upsert(entity)).await?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn update(&self, entity: T) -> DalResult<usize> {
        let session = self.session()?;
        ExceptionTranslator::wrap_future(session.track_update(entity)).await?;
        Ok(1)
    }

    pub async fn delete(&self, entity: &T) -> DalResult<usize> {
        self.delete_by_key(&entity.key()).await
    }

    pub async fn delete_by_key(&self, key: &T::Key) -> DalResult<usize> {
        let session = self.session()?;
        ExceptionTranslator::wrap_future(session.track_remove::<T>(key)).await?;
        Ok(1)
    }

    pub async fn delete_range<'a, I>(&self, entities: I) -> DalResult<usize>
    where
        I: IntoIterator<Item = &'a T>,
    {
        let session = self.session()?;
        let mut count = 0;
        for entity in entities {
            ExceptionTranslator::wrap_future(session.track_remove::<T>(&entity.key())).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Tracks removal of every entity matching `filter`.
    pub async fn delete_all<P>(&self, filter: P) -> DalResult<usize>
    where
        P: Fn(&T) -> bool,
    {
        let doomed = self.query(filter).await?;
        let session = self.session()?;
        for entity in &doomed {
            ExceptionTranslator::wrap_future(session.track_remove::<T>(&entity.key())).await?;
        }
        Ok(doomed.len())
    }

    pub async fn count(&self) -> DalResult<usize> {
        Ok(self.get_all().await?.len())
    }

    pub async fn count_where<P>(&self, filter: P) -> DalResult<usize>
    where
        P: Fn(&T) -> bool,
    {
        Ok(self.get_all().await?.iter().filter(|e| filter(*e)).count())
    }

    pub async fn query<P>(&self, filter: P) -> DalResult<Vec<T>>
    where
        P: Fn(&T) -> bool,
    {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|e| filter(e))
            .collect())
    }

    pub async fn query_ordered<P, O>(&self, filter: P, order: O) -> DalResult<Vec<T>>
    where
        P: Fn(&T) -> bool,
        O: FnMut(&T, &T) -> Ordering,
    {
        let mut items = self.query(filter).await?;
        items.sort_by(order);
        Ok(items)
    }

    /// Runs `callback` over every entity in the set.
    pub async fn query_with<R, C>(&self, callback: C) -> DalResult<R>
    where
        C: FnOnce(Vec<T>) -> R,
    {
        Ok(callback(self.get_all().await?))
    }

    pub async fn paged<P, O>(
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
        let all = self.query_ordered(filter, order).await?;
        Ok(Page::from_ordered(all, page_number, page_size))
    }

    /// Deletes matching entities right away, bypassing change tracking.
    pub async fn delete_immediately<P>(&self, filter: P) -> DalResult<usize>
    where
        P: Fn(&T) -> bool + Send + Sync,
    {
        let session = self.session()?;
        ExceptionTranslator::wrap_future(session.execute_delete::<T>(&filter)).await
    }

    /// Rewrites matching entities right away, bypassing change tracking.
    pub async fn update_immediately<P, U>(&self, filter: P, updater: U) -> DalResult<usize>
    where
        P: Fn(&T) -> bool + Send + Sync,
        U: Fn(T) -> T + Send + Sync,
    {
        let session = self.session()?;
        ExceptionTranslator::wrap_future(session.execute_update::<T>(&filter, &updater)).await
    }
}
