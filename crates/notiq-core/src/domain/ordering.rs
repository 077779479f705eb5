//! Ordering rule shared by claim selection and domain event sequencing.
//!
//! 1. `effective_date` ascending
//! 2. `total_ordering` ascending (insertion / creation sequence)
//! 3. `catalog_effective_date` ascending (an immutable snapshot; `None` first)
//!
//! The rule is a pure function of the item's own fields: nothing here looks
//! anything up at comparison time.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Sort key in rule order. Deriving `Ord` compares the fields top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderingKey {
    pub effective_date: DateTime<Utc>,
    pub total_ordering: i64,
    pub catalog_effective_date: Option<DateTime<Utc>>,
}

/// Anything that can be placed on the shared timeline.
pub trait TimedOrdering {
    fn effective_date(&self) -> DateTime<Utc>;

    fn total_ordering(&self) -> i64;

    fn catalog_effective_date(&self) -> Option<DateTime<Utc>>;

    fn ordering_key(&self) -> OrderingKey {
        OrderingKey {
            effective_date: self.effective_date(),
            total_ordering: self.total_ordering(),
            catalog_effective_date: self.catalog_effective_date(),
        }
    }

    fn cmp_timed<O: TimedOrdering + ?Sized>(&self, other: &O) -> Ordering {
        self.ordering_key().cmp(&other.ordering_key())
    }
}

/// Stable in-place sort by the ordering rule.
pub fn sort_timed<T: TimedOrdering>(items: &mut [T]) {
    items.sort_by_key(|item| item.ordering_key());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        name: &'static str,
        at: DateTime<Utc>,
        seq: i64,
        catalog: Option<DateTime<Utc>>,
    }

    impl TimedOrdering for Item {
        fn effective_date(&self) -> DateTime<Utc> {
            self.at
        }
        fn total_ordering(&self) -> i64 {
            self.seq
        }
        fn catalog_effective_date(&self) -> Option<DateTime<Utc>> {
            self.catalog
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn item(name: &'static str, at: DateTime<Utc>, seq: i64, catalog: Option<DateTime<Utc>>) -> Item {
        Item { name, at, seq, catalog }
    }

    #[test]
    fn effective_date_dominates() {
        let early = item("early", t0(), 9, None);
        let late = item("late", t0() + Duration::seconds(1), 1, None);
        assert_eq!(early.cmp_timed(&late), Ordering::Less);
    }

    #[test]
    fn total_ordering_breaks_date_ties() {
        let x = item("x", t0(), 1, None);
        let y = item("y", t0(), 2, None);
        assert_eq!(x.cmp_timed(&y), Ordering::Less);
        assert_eq!(y.cmp_timed(&x), Ordering::Greater);
    }

    #[test]
    fn catalog_date_breaks_remaining_ties() {
        let t1 = t0() - Duration::days(30);
        let t2 = t0() - Duration::days(1);
        let a = item("a", t0(), 1, Some(t2));
        let b = item("b", t0(), 1, Some(t1));
        assert_eq!(b.cmp_timed(&a), Ordering::Less);
    }

    #[test]
    fn missing_catalog_date_sorts_first() {
        let with = item("with", t0(), 1, Some(t0()));
        let without = item("without", t0(), 1, None);
        assert_eq!(without.cmp_timed(&with), Ordering::Less);
    }

    #[test]
    fn sort_is_deterministic_and_stable() {
        let mut items = vec![
            item("d", t0() + Duration::hours(1), 1, None),
            item("c", t0(), 2, Some(t0())),
            item("b", t0(), 2, None),
            item("a", t0(), 1, None),
            item("a-dup", t0(), 1, None),
        ];
        sort_timed(&mut items);
        let names: Vec<_> = items.iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["a", "a-dup", "b", "c", "d"]);
    }
}
