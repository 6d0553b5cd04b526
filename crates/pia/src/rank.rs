use crate::fdr::FdrItem;
use crate::report::{ReportPeptide, ReportProtein, ReportPsm, ReportPsmSet};
use crate::score::{compare_scores, same_score};

pub trait Rankable: FdrItem {
    fn rank(&self) -> Option<u32>;
    fn set_rank(&mut self, rank: Option<u32>);
}

macro_rules! rankable {
    ($($ty:ty),*) => {
        $(impl Rankable for $ty {
            fn rank(&self) -> Option<u32> {
                self.rank
            }

            fn set_rank(&mut self, rank: Option<u32>) {
                self.rank = rank;
            }
        })*
    };
}

rankable!(ReportPsm, ReportPsmSet, ReportPeptide, ReportProtein);

/// Standard competition ranking ("1224") of the items accepted by `keep`,
/// best score first. Rejected items lose their rank. The order of `items` is
/// left untouched.
pub fn calculate_ranking<T, F>(items: &mut [T], score: &str, higher_score_better: bool, keep: F)
where
    T: Rankable,
    F: Fn(&T) -> bool,
{
    let mut order = Vec::with_capacity(items.len());
    for (ix, item) in items.iter_mut().enumerate() {
        item.set_rank(None);
        if keep(item) {
            order.push((ix, item.score(score)));
        }
    }
    order.sort_by(|a, b| compare_scores(a.1, b.1, higher_score_better));

    let mut rank = 0;
    for (pos, (ix, value)) in order.iter().enumerate() {
        if pos == 0 || !same_score(*value, order[pos - 1].1) {
            rank = pos as u32 + 1;
        }
        items[*ix].set_rank(Some(rank));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdr::tests::Item;

    impl Rankable for Item {
        fn rank(&self) -> Option<u32> {
            self.rank
        }

        fn set_rank(&mut self, rank: Option<u32>) {
            self.rank = rank;
        }
    }

    #[test]
    fn competition_ranking() {
        let mut items = [5.0, 9.0, 7.0, 9.0, f64::NAN, 1.0, 7.0]
            .iter()
            .map(|&s| Item::new(s, false))
            .collect::<Vec<_>>();
        calculate_ranking(&mut items, "mascot_score", true, |item| item.score != 1.0);
        let ranks = items.iter().map(|i| i.rank).collect::<Vec<_>>();
        assert_eq!(
            ranks,
            vec![Some(5), Some(1), Some(3), Some(1), Some(6), None, Some(3)]
        );

        calculate_ranking(&mut items, "mascot_score", false, |_| true);
        assert_eq!(items[5].rank, Some(1));
        assert_eq!(items[4].rank, Some(7));
    }
}
