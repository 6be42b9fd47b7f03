//! # Result Merge Algorithms
//!
//! Pure functions combining per-target row sets into one logical row set.
//!
//! Order of operations for a fanned-out SELECT:
//! 1. ordered merge (k-way) or concatenation in route order;
//! 2. grouping and aggregate reduction, then sorting;
//! 3. DISTINCT on the visible columns;
//! 4. OFFSET / LIMIT;
//! 5. removal of derived columns.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::domain::{AggregationKind, RowSet, ShardingError, SortDirection, SqlValue, StatementKind};

/// How one aggregate projection is recombined.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregationPlan {
    /// Aggregate function.
    pub kind: AggregationKind,
    /// Label of the aggregate column.
    pub label: String,
    /// Derived SUM column backing an AVG.
    pub sum_label: Option<String>,
    /// Derived COUNT column backing an AVG.
    pub count_label: Option<String>,
}

/// Merge instructions produced by the router.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergePlan {
    /// Statement category.
    pub kind: StatementKind,
    /// Sort keys by column label.
    pub order_by: Vec<(String, SortDirection)>,
    /// Group keys by column label.
    pub group_by: Vec<String>,
    /// Aggregates to recombine.
    pub aggregations: Vec<AggregationPlan>,
    /// SELECT DISTINCT.
    pub distinct: bool,
    /// Rows to skip after merging.
    pub offset: u64,
    /// Rows to keep after merging.
    pub limit: Option<u64>,
    /// Columns added by the router and removed before returning.
    pub derived_columns: Vec<String>,
}

impl MergePlan {
    /// Concatenate (reads) or sum (writes), nothing else.
    pub fn pass_through(kind: StatementKind) -> Self {
        Self {
            kind,
            order_by: Vec::new(),
            group_by: Vec::new(),
            aggregations: Vec::new(),
            distinct: false,
            offset: 0,
            limit: None,
            derived_columns: Vec::new(),
        }
    }

    /// True when rows need grouping or aggregate reduction.
    pub fn is_grouping(&self) -> bool {
        !self.group_by.is_empty() || !self.aggregations.is_empty()
    }
}

/// Aggregate with column labels resolved to indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedAggregation {
    /// Aggregate function.
    pub kind: AggregationKind,
    /// Aggregate column.
    pub index: usize,
    /// Derived SUM column (AVG only).
    pub sum_index: Option<usize>,
    /// Derived COUNT column (AVG only).
    pub count_index: Option<usize>,
}

/// Sort key: column index plus direction.
pub type SortKey = (usize, SortDirection);

fn resolve(columns: &RowSet, label: &str) -> Result<usize, ShardingError> {
    columns.column_index(label).ok_or_else(|| {
        ShardingError::UnsupportedSql(format!("column {label} missing from shard results"))
    })
}

/// Merge per-target row sets according to `plan`.
///
/// `sets` must be in route order; every set is expected to carry the same
/// column labels.
pub fn merge_row_sets(plan: &MergePlan, sets: Vec<RowSet>) -> Result<RowSet, ShardingError> {
    let Some(first) = sets.first() else {
        return Ok(RowSet::default());
    };
    let header = RowSet::new(first.columns.clone(), Vec::new());
    let sort_keys = plan
        .order_by
        .iter()
        .map(|(label, direction)| Ok((resolve(&header, label)?, *direction)))
        .collect::<Result<Vec<SortKey>, ShardingError>>()?;

    let mut rows = if plan.is_grouping() {
        let group_keys = plan
            .group_by
            .iter()
            .map(|label| resolve(&header, label))
            .collect::<Result<Vec<_>, _>>()?;
        let aggregations = plan
            .aggregations
            .iter()
            .map(|agg| {
                Ok(ResolvedAggregation {
                    kind: agg.kind,
                    index: resolve(&header, &agg.label)?,
                    sum_index: agg.sum_label.as_deref().and_then(|l| header.column_index(l)),
                    count_index: agg.count_label.as_deref().and_then(|l| header.column_index(l)),
                })
            })
            .collect::<Result<Vec<_>, ShardingError>>()?;
        let concatenated = sets.into_iter().flat_map(|set| set.rows).collect();
        let mut grouped = group_rows(concatenated, &group_keys, &aggregations);
        if !sort_keys.is_empty() {
            grouped.sort_by(|a, b| compare_rows(a, b, &sort_keys));
        } else if !group_keys.is_empty() {
            let keys: Vec<SortKey> = group_keys.iter().map(|i| (*i, SortDirection::Asc)).collect();
            grouped.sort_by(|a, b| compare_rows(a, b, &keys));
        }
        grouped
    } else if !sort_keys.is_empty() {
        kway_merge(sets.into_iter().map(|set| set.rows).collect(), &sort_keys)
    } else {
        sets.into_iter().flat_map(|set| set.rows).collect()
    };

    let visible: Vec<usize> = (0..header.columns.len())
        .filter(|i| {
            !plan
                .derived_columns
                .iter()
                .any(|d| d.eq_ignore_ascii_case(&header.columns[*i]))
        })
        .collect();
    if plan.distinct {
        rows = distinct(rows, &visible);
    }
    rows = paginate(rows, plan.offset, plan.limit);
    Ok(project(header.columns, rows, &visible))
}

/// Compare two rows on the given keys.
pub fn compare_rows(a: &[SqlValue], b: &[SqlValue], keys: &[SortKey]) -> Ordering {
    for (index, direction) in keys {
        let ordering = match (a.get(*index), b.get(*index)) {
            (Some(x), Some(y)) => x.cmp(y),
            (x, y) => x.is_some().cmp(&y.is_some()),
        };
        let ordering = direction.apply(ordering);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

struct HeapEntry<'a> {
    row: Vec<SqlValue>,
    source: usize,
    keys: &'a [SortKey],
}

impl Ord for HeapEntry<'_> {
    // Reversed: `BinaryHeap` is a max-heap and we pop the smallest row.
    fn cmp(&self, other: &Self) -> Ordering {
        compare_rows(&other.row, &self.row, self.keys).then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry<'_> {}

/// Merge locally sorted streams into one sorted stream.
///
/// Ties keep stream order, so the merge is stable across targets.
pub fn kway_merge(streams: Vec<Vec<Vec<SqlValue>>>, keys: &[SortKey]) -> Vec<Vec<SqlValue>> {
    let total = streams.iter().map(Vec::len).sum();
    let mut iterators: Vec<_> = streams.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(iterators.len());
    for (source, iterator) in iterators.iter_mut().enumerate() {
        if let Some(row) = iterator.next() {
            heap.push(HeapEntry { row, source, keys });
        }
    }
    let mut merged = Vec::with_capacity(total);
    while let Some(HeapEntry { row, source, .. }) = heap.pop() {
        merged.push(row);
        if let Some(next) = iterators[source].next() {
            heap.push(HeapEntry {
                row: next,
                source,
                keys,
            });
        }
    }
    merged
}

/// Group rows on `group_keys` (first-seen order) and reduce each group.
///
/// Without group keys every row belongs to one group.
pub fn group_rows(
    rows: Vec<Vec<SqlValue>>,
    group_keys: &[usize],
    aggregations: &[ResolvedAggregation],
) -> Vec<Vec<SqlValue>> {
    let mut index: HashMap<Vec<SqlValue>, usize> = HashMap::new();
    let mut groups: Vec<Vec<Vec<SqlValue>>> = Vec::new();
    for row in rows {
        let key: Vec<SqlValue> = group_keys
            .iter()
            .map(|i| row.get(*i).cloned().unwrap_or(SqlValue::Null))
            .collect();
        match index.get(&key) {
            Some(position) => groups[*position].push(row),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![row]);
            }
        }
    }
    groups
        .iter()
        .filter_map(|group| reduce_group(group, aggregations))
        .collect()
}

/// Combine the partial aggregates of one group into a single row.
///
/// COUNT and SUM add up, MAX and MIN reduce, AVG is recomputed from the
/// derived SUM and COUNT columns. Non-aggregate columns keep the first
/// row's value.
pub fn reduce_group(
    rows: &[Vec<SqlValue>],
    aggregations: &[ResolvedAggregation],
) -> Option<Vec<SqlValue>> {
    let mut merged = rows.first()?.clone();
    let sum = |index: usize| {
        rows.iter()
            .filter_map(|row| row.get(index))
            .fold(SqlValue::Null, |acc, v| acc.add(v))
    };
    for agg in aggregations {
        let value = match agg.kind {
            AggregationKind::Count => match sum(agg.index) {
                SqlValue::Null => SqlValue::Int(0),
                total => total,
            },
            AggregationKind::Sum => sum(agg.index),
            AggregationKind::Max => column(rows, agg.index).max().cloned().unwrap_or(SqlValue::Null),
            AggregationKind::Min => column(rows, agg.index).min().cloned().unwrap_or(SqlValue::Null),
            AggregationKind::Avg => match (agg.sum_index, agg.count_index) {
                (Some(sum_index), Some(count_index)) => {
                    let total = sum(sum_index);
                    let count = sum(count_index);
                    let avg = match (total.as_f64(), count.as_f64()) {
                        (Some(t), Some(c)) if c != 0.0 => SqlValue::Float(t / c),
                        _ => SqlValue::Null,
                    };
                    merged[sum_index] = total;
                    merged[count_index] = count;
                    avg
                }
                // Only reachable for single-target results.
                _ => merged[agg.index].clone(),
            },
        };
        merged[agg.index] = value;
    }
    Some(merged)
}

fn column<'a>(rows: &'a [Vec<SqlValue>], index: usize) -> impl Iterator<Item = &'a SqlValue> {
    rows.iter()
        .filter_map(move |row| row.get(index))
        .filter(|v| !v.is_null())
}

/// Drop rows whose visible columns repeat an earlier row.
pub fn distinct(rows: Vec<Vec<SqlValue>>, visible: &[usize]) -> Vec<Vec<SqlValue>> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let key: Vec<SqlValue> = visible.iter().filter_map(|i| row.get(*i).cloned()).collect();
            seen.insert(key)
        })
        .collect()
}

/// Apply OFFSET then LIMIT.
pub fn paginate(rows: Vec<Vec<SqlValue>>, offset: u64, limit: Option<u64>) -> Vec<Vec<SqlValue>> {
    let offset = usize::try_from(offset).unwrap_or(usize::MAX);
    let limit = limit
        .and_then(|l| usize::try_from(l).ok())
        .unwrap_or(usize::MAX);
    rows.into_iter().skip(offset).take(limit).collect()
}

fn project(columns: Vec<String>, rows: Vec<Vec<SqlValue>>, visible: &[usize]) -> RowSet {
    if visible.len() == columns.len() {
        return RowSet::new(columns, rows);
    }
    let pick = |values: &[String]| visible.iter().map(|i| values[*i].clone()).collect();
    let columns = pick(&columns);
    let rows = rows
        .into_iter()
        .map(|row| visible.iter().filter_map(|i| row.get(*i).cloned()).collect())
        .collect();
    RowSet::new(columns, rows)
}
