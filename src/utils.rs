use ndarray::prelude::*;
use ndarray::Data;

use std::cmp::Ordering;

// argsort_by function from: https://github.com/rust-ndarray/ndarray/issues/1145
pub fn argsort_by<S, F>(arr: &ArrayBase<S, Ix1>, mut compare: F) -> Vec<usize>
where
    S: Data,
    F: FnMut(&S::Elem, &S::Elem) -> Ordering,
{
    let mut indices: Vec<usize> = (0..arr.len()).collect();
    indices.sort_by(move |&i, &j| compare(&arr[i], &arr[j]));
    indices
}

/// Index of the first maximum. NaN entries never win; an all-NaN or empty vector yields `None`.
pub fn argmax<S>(arr: &ArrayBase<S, Ix1>) -> Option<usize>
where
    S: Data<Elem = f32>,
{
    arr.iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, max)) if v <= max => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Indices of the `k` largest values, largest first. Ties keep index order.
pub fn top_k<S>(arr: &ArrayBase<S, Ix1>, k: usize) -> Vec<usize>
where
    S: Data<Elem = f32>,
{
    let mut order = argsort_by(arr, |a, b| b.total_cmp(a));
    order.retain(|&i| !arr[i].is_nan());
    order.truncate(k);
    order
}

#[cfg(feature = "save")]
pub mod save {
    use std::path::Path;

    use ndarray::Array2;

    use crate::Result;

    /// Write one CSV row per probability vector.
    pub fn savetxt(a: &Array2<f32>, filename: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(filename)?;
        let mut writer = csv::Writer::from_writer(file);
        for row in a.outer_iter() {
            writer.serialize(row.iter().collect::<Vec<_>>())?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn argmax_picks_first_maximum() {
        let a = array![0.1_f32, 0.4, 0.4, 0.1];
        assert_eq!(argmax(&a), Some(1));
    }

    #[test]
    fn argmax_skips_nan() {
        let a = array![f32::NAN, 0.2, 0.7, f32::NAN];
        assert_eq!(argmax(&a), Some(2));
        let empty: Array1<f32> = Array1::zeros(0);
        assert_eq!(argmax(&empty), None);
        assert_eq!(argmax(&array![f32::NAN]), None);
    }

    #[test]
    fn top_k_is_descending() {
        let a = array![0.05_f32, 0.5, 0.2, 0.25];
        assert_eq!(top_k(&a, 3), vec![1, 3, 2]);
        assert_eq!(top_k(&a, 10).len(), 4);
    }

    #[test]
    fn argsort_by_ascending() {
        let a = array![3.0_f32, 1.0, 2.0];
        assert_eq!(argsort_by(&a, |x, y| x.total_cmp(y)), vec![1, 2, 0]);
    }
}
