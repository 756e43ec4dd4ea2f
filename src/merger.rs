//! Heap-backed k-way merge step.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::error::Error;

/// Merges up to `k` sorted fallible inputs into a single sorted stream.
/// Time complexity is *m* \* log(*k*) in the worst case where *m* is the
/// total number of records and *k* the number of inputs.
///
/// Equal values from different origins may interleave in any order: this
/// is a merge of independent sorted sequences, not a stable merge of
/// tagged keys. An `Err` from any input is yielded immediately and the
/// merge must be considered aborted; natural exhaustion of an input is
/// simply the end of its iterator.
pub struct KWayMerger<T, E, I>
where
    T: Ord,
    E: Error,
    I: Iterator<Item = Result<T, E>>,
{
    // binary heap is a max-heap by default so entries are reversed
    entries: BinaryHeap<(Reverse<T>, usize)>,
    inputs: Vec<I>,
    primed: bool,
}

impl<T, E, I> KWayMerger<T, E, I>
where
    T: Ord,
    E: Error,
    I: Iterator<Item = Result<T, E>>,
{
    /// Creates a merger over the given inputs. Each input must already be
    /// sorted in ascending order, otherwise the result is undefined.
    pub fn new<C>(inputs: C) -> Self
    where
        C: IntoIterator,
        C::Item: IntoIterator<Item = Result<T, E>, IntoIter = I>,
    {
        let inputs = Vec::from_iter(inputs.into_iter().map(|input| input.into_iter()));
        let entries = BinaryHeap::with_capacity(inputs.len());

        KWayMerger {
            entries,
            inputs,
            primed: false,
        }
    }
}

impl<T, E, I> Iterator for KWayMerger<T, E, I>
where
    T: Ord,
    E: Error,
    I: Iterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next record of the union in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.primed {
            for (origin, input) in self.inputs.iter_mut().enumerate() {
                if let Some(record) = input.next() {
                    match record {
                        Ok(record) => self.entries.push((Reverse(record), origin)),
                        Err(err) => return Some(Err(err)),
                    }
                }
            }
            self.primed = true;
        }

        let (Reverse(record), origin) = self.entries.pop()?;
        if let Some(refill) = self.inputs[origin].next() {
            match refill {
                Ok(refill) => self.entries.push((Reverse(refill), origin)),
                Err(err) => return Some(Err(err)),
            }
        }

        Some(Ok(record))
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, ErrorKind};

    use rstest::*;

    use super::KWayMerger;

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![],
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![Ok(4), Ok(5), Ok(7)],
            vec![Ok(1), Ok(6)],
            vec![Ok(3)],
            vec![],
        ],
        vec![Ok(1), Ok(3), Ok(4), Ok(5), Ok(6), Ok(7)],
    )]
    #[case(
        vec![
            vec![Ok(-5), Ok(-5), Ok(0)],
            vec![Ok(-5), Ok(2)],
        ],
        vec![Ok(-5), Ok(-5), Ok(-5), Ok(0), Ok(2)],
    )]
    #[case(
        vec![
            vec![Result::Err(io::Error::new(ErrorKind::Other, "test error"))],
        ],
        vec![
            Result::Err(io::Error::new(ErrorKind::Other, "test error")),
        ],
    )]
    #[case(
        vec![
            vec![Ok(3), Result::Err(io::Error::new(ErrorKind::Other, "test error"))],
            vec![Ok(1), Ok(2)],
        ],
        vec![
            Ok(1),
            Ok(2),
            Result::Err(io::Error::new(ErrorKind::Other, "test error")),
        ],
    )]
    fn test_merger(
        #[case] inputs: Vec<Vec<Result<i64, io::Error>>>,
        #[case] expected: Vec<Result<i64, io::Error>>,
    ) {
        let merger = KWayMerger::new(inputs);
        let actual: Vec<Result<i64, io::Error>> = merger.collect();

        assert!(
            actual.len() == expected.len()
                && actual.iter().zip(&expected).all(|pair| match pair {
                    (Ok(a), Ok(e)) => a == e,
                    (Err(a), Err(e)) => a.to_string() == e.to_string(),
                    _ => false,
                }),
            "actual={:?}, expected={:?}",
            actual,
            expected
        );
    }

    #[test]
    fn test_merger_preserves_total_count() {
        let inputs: Vec<Vec<Result<i64, io::Error>>> = vec![
            (0..50).map(|v| Ok(v * 2)).collect(),
            (0..50).map(|v| Ok(v * 2 + 1)).collect(),
        ];

        let merged: Result<Vec<i64>, io::Error> = KWayMerger::new(inputs).collect();
        let merged = merged.unwrap();

        assert_eq!(merged, Vec::from_iter(0..100));
    }
}
