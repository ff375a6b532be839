//! Event-code to class-index remapping
//!
//! Epoching yields the raw event code of every trial (e.g. 2 and 3 for the
//! EEGBCI hands/feet annotations). The classifier expects zero-based class
//! indices, assigned in ascending code order.

use ndarray::{Array1, ArrayView1};

use crate::error::LabelError;

/// Map each event code in `codes` to its position among the ascending,
/// de-duplicated `class_codes`.
///
/// ```
/// use ndarray::array;
/// use trialwise_core::remap_labels;
///
/// let y = remap_labels(array![3_i64, 2, 2, 3].view(), &[2, 3]).unwrap();
/// assert_eq!(y, array![1_i64, 0, 0, 1]);
/// ```
///
/// # Errors
///
/// - [`LabelError::NoClasses`] if `class_codes` is empty
/// - [`LabelError::UnknownCode`] if a code is not one of `class_codes`
pub fn remap_labels(codes: ArrayView1<'_, i64>, class_codes: &[u32]) -> Result<Array1<i64>, LabelError> {
    if class_codes.is_empty() {
        return Err(LabelError::NoClasses);
    }

    let mut classes: Vec<i64> = class_codes.iter().map(|&c| i64::from(c)).collect();
    classes.sort_unstable();
    classes.dedup();

    codes
        .iter()
        .enumerate()
        .map(|(position, &code)| {
            classes
                .binary_search(&code)
                .map(|idx| idx as i64)
                .map_err(|_| LabelError::UnknownCode { position, code })
        })
        .collect::<Result<Vec<i64>, LabelError>>()
        .map(Array1::from_vec)
}

/// Number of trials per class index, for `n_classes` classes.
///
/// Labels outside `0..n_classes` are ignored.
pub fn class_counts(labels: ArrayView1<'_, i64>, n_classes: usize) -> Vec<usize> {
    let mut counts = vec![0; n_classes];
    for &label in labels {
        if let Ok(idx) = usize::try_from(label) {
            if let Some(slot) = counts.get_mut(idx) {
                *slot += 1;
            }
        }
    }
    counts
}
