//! Keyset pagination over an [`EntityStore`].
//!
//! The lister asks the store for one row more than the page size. The extra
//! row only tells whether another page exists in the scan direction and is
//! never returned. Cursors are minted from the first and last returned items,
//! so a page boundary is a position in the `(created_at, id)` order and not
//! an offset.

use catalog_gateway_core::{
    cursor, validation, CatalogError, Direction, Entity, EntityType, FieldSet, Include, Page,
    PageRequest, Result, SortKey, MAX_PAGE_LIMIT,
};
use catalog_gateway_storage::{EntityStore, PageQuery};
use std::sync::Arc;
use tracing::debug;

/// A validated listing: fields parsed, cursor decoded, direction resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub entity_type: EntityType,
    pub fields: FieldSet,
    pub service: Option<String>,
    pub limit: usize,
    pub direction: Direction,
    pub cursor: Option<SortKey>,
    pub include: Include,
}

impl ListQuery {
    /// Validate a request before anything is fetched.
    ///
    /// Fails with `InvalidArgument` when both cursors are set or the limit is
    /// out of range, `MalformedCursor` when the cursor does not decode and
    /// `UnknownField` on any unrecognised field name.
    pub fn from_request(request: &PageRequest, max_limit: usize) -> Result<Self> {
        let (direction, token) = match (&request.before, &request.after) {
            (Some(_), Some(_)) => {
                return Err(CatalogError::InvalidArgument(
                    "before and after are mutually exclusive".to_string(),
                ))
            }
            (Some(before), None) => (Direction::Backward, Some(before)),
            (None, Some(after)) => (Direction::Forward, Some(after)),
            (None, None) => (Direction::Forward, None),
        };

        validation::validate_limit(request.limit, max_limit)?;
        let fields = FieldSet::parse(request.entity_type, &request.fields)?;
        if let Some(service) = &request.service {
            validation::validate_identifier(service, "service")?;
        }
        let cursor = token.map(|t| cursor::decode(t)).transpose()?;

        Ok(Self {
            entity_type: request.entity_type,
            fields,
            service: request.service.clone(),
            limit: request.limit,
            direction,
            cursor,
            include: request.include,
        })
    }
}

/// Fetches pages of entities in either direction.
#[derive(Clone)]
pub struct PaginatedLister {
    store: Arc<dyn EntityStore>,
}

impl PaginatedLister {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Fetch one page.
    ///
    /// Items are always in ascending sort-key order. `after` is set when more
    /// items follow the page, `before` when more items precede it.
    pub async fn list(&self, query: &ListQuery) -> Result<Page<Entity>> {
        validation::validate_limit(query.limit, MAX_PAGE_LIMIT)?;
        if query.direction == Direction::Backward && query.cursor.is_none() {
            return Err(CatalogError::InvalidArgument(
                "paging backward requires a cursor".to_string(),
            ));
        }

        let fetch = PageQuery {
            entity_type: query.entity_type,
            direction: query.direction,
            cursor: query.cursor,
            limit: query.limit + 1,
            service: query.service.clone(),
            fields: query.fields.clone(),
            include: query.include,
        };

        let mut rows = self.store.fetch_page(&fetch).await?;
        let has_more = rows.len() > query.limit;
        rows.truncate(query.limit);

        let token = |entity: &Entity| cursor::encode(&entity.sort_key());

        let page = match query.direction {
            Direction::Forward => Page {
                before: if query.cursor.is_some() {
                    rows.first().map(token)
                } else {
                    None
                },
                after: if has_more { rows.last().map(token) } else { None },
                items: rows,
            },
            Direction::Backward => {
                rows.reverse();
                Page {
                    before: if has_more { rows.first().map(token) } else { None },
                    after: rows.last().map(token),
                    items: rows,
                }
            }
        };

        debug!(
            entity_type = %query.entity_type,
            direction = ?query.direction,
            items = page.items.len(),
            has_more,
            "Listed page"
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// In-memory store that applies the same range semantics as SQLite.
    struct VecStore {
        entities: Vec<Entity>,
        fetches: AtomicUsize,
    }

    impl VecStore {
        fn new(mut entities: Vec<Entity>) -> Self {
            entities.sort_by_key(|e| e.sort_key());
            Self {
                entities,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    impl EntityStore for VecStore {
        fn fetch_page<'a>(
            &'a self,
            query: &'a PageQuery,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Entity>>> + Send + 'a>> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                let in_range = |e: &&Entity| match (query.direction, query.cursor) {
                    (_, None) => true,
                    (Direction::Forward, Some(c)) => e.sort_key() > c,
                    (Direction::Backward, Some(c)) => e.sort_key() < c,
                };
                let rows: Vec<Entity> = match query.direction {
                    Direction::Forward => self
                        .entities
                        .iter()
                        .filter(in_range)
                        .take(query.limit)
                        .cloned()
                        .collect(),
                    Direction::Backward => self
                        .entities
                        .iter()
                        .rev()
                        .filter(in_range)
                        .take(query.limit)
                        .cloned()
                        .collect(),
                };
                Ok(rows)
            })
        }
    }

    /// Tables a..e with distinct ids but identical timestamps, so ordering
    /// rests entirely on the id tie-break.
    fn five_tables() -> Vec<Entity> {
        let created_at = catalog_gateway_core::now_micros();
        ["a", "b", "c", "d", "e"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut entity = Entity::new(EntityType::Table, *name);
                entity.id = Uuid::from_u128(i as u128 + 1);
                entity.created_at = created_at;
                entity
            })
            .collect()
    }

    fn names(page: &Page<Entity>) -> Vec<&str> {
        page.items.iter().map(|e| e.name.as_str()).collect()
    }

    fn query(limit: usize) -> ListQuery {
        ListQuery::from_request(&PageRequest::new(EntityType::Table).with_limit(limit), 100)
            .unwrap()
    }

    #[tokio::test]
    async fn test_forward_pages() {
        let lister = PaginatedLister::new(Arc::new(VecStore::new(five_tables())));

        let p1 = lister.list(&query(2)).await.unwrap();
        assert_eq!(names(&p1), vec!["a", "b"]);
        assert!(p1.before.is_none());

        let mut q = query(2);
        q.cursor = Some(cursor::decode(p1.after.as_deref().unwrap()).unwrap());
        let p2 = lister.list(&q).await.unwrap();
        assert_eq!(names(&p2), vec!["c", "d"]);
        assert!(p2.before.is_some());

        q.cursor = Some(cursor::decode(p2.after.as_deref().unwrap()).unwrap());
        let p3 = lister.list(&q).await.unwrap();
        assert_eq!(names(&p3), vec!["e"]);
        assert!(p3.after.is_none());
    }

    #[tokio::test]
    async fn test_backward_mirrors_forward() {
        let lister = PaginatedLister::new(Arc::new(VecStore::new(five_tables())));

        let mut q = query(2);
        let p1 = lister.list(&q).await.unwrap();
        q.cursor = Some(cursor::decode(p1.after.as_deref().unwrap()).unwrap());
        let p2 = lister.list(&q).await.unwrap();
        q.cursor = Some(cursor::decode(p2.after.as_deref().unwrap()).unwrap());
        let p3 = lister.list(&q).await.unwrap();

        let mut back = query(2);
        back.direction = Direction::Backward;
        back.cursor = Some(cursor::decode(p3.before.as_deref().unwrap()).unwrap());
        let b2 = lister.list(&back).await.unwrap();
        assert_eq!(b2.items, p2.items);

        back.cursor = Some(cursor::decode(b2.before.as_deref().unwrap()).unwrap());
        let b1 = lister.list(&back).await.unwrap();
        assert_eq!(b1.items, p1.items);
        assert!(b1.before.is_none());
        assert_eq!(b1.after, p1.after);
    }

    #[tokio::test]
    async fn test_backward_without_cursor_rejected() {
        let store = Arc::new(VecStore::new(five_tables()));
        let lister = PaginatedLister::new(store.clone());

        let mut q = query(2);
        q.direction = Direction::Backward;
        assert!(matches!(
            lister.list(&q).await,
            Err(CatalogError::InvalidArgument(_))
        ));
        assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let lister = PaginatedLister::new(Arc::new(VecStore::new(five_tables())));
        let mut q = query(2);
        q.limit = 0;
        assert!(matches!(
            lister.list(&q).await,
            Err(CatalogError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_exact_fit_has_no_after_cursor() {
        let lister = PaginatedLister::new(Arc::new(VecStore::new(five_tables())));
        let page = lister.list(&query(5)).await.unwrap();
        assert_eq!(page.items.len(), 5);
        assert!(page.after.is_none());
        assert!(page.before.is_none());
    }

    #[test]
    fn test_from_request_validation() {
        let base = PageRequest::new(EntityType::Table);

        let both = base.clone().after("x").before("y");
        assert!(matches!(
            ListQuery::from_request(&both, 100),
            Err(CatalogError::InvalidArgument(_))
        ));

        let garbage = base.clone().after("%%%not-a-cursor");
        assert!(matches!(
            ListQuery::from_request(&garbage, 100),
            Err(CatalogError::MalformedCursor(_))
        ));

        let too_big = base.clone().with_limit(101);
        assert!(matches!(
            ListQuery::from_request(&too_big, 100),
            Err(CatalogError::InvalidArgument(_))
        ));

        let bad_field = base.clone().with_fields(["connection"]);
        assert!(matches!(
            ListQuery::from_request(&bad_field, 100),
            Err(CatalogError::UnknownField(_))
        ));

        let token = cursor::encode(&SortKey::new(42, Uuid::nil()));
        let backward = ListQuery::from_request(&base.before(token), 100).unwrap();
        assert_eq!(backward.direction, Direction::Backward);
        assert_eq!(backward.cursor, Some(SortKey::new(42, Uuid::nil())));
    }
}
