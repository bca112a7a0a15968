use formula_sheet_sync::columns::{index_to_label, is_valid_label, label_to_index};
use proptest::prelude::*;

#[test]
fn first_ten_thousand_indices_round_trip() {
    for n in 0..=10_000u32 {
        let label = index_to_label(n);
        assert!(is_valid_label(&label), "{n} -> {label:?}");
        assert_eq!(label_to_index(&label).unwrap(), n, "{label}");
    }
}

proptest! {
    #[test]
    fn short_labels_round_trip(label in "[A-Z]{1,3}") {
        let index = label_to_index(&label).unwrap();
        prop_assert_eq!(index_to_label(index), label);
    }

    #[test]
    fn labels_sort_like_their_indices(a in 0u32..1_000_000, b in 0u32..1_000_000) {
        let (la, lb) = (index_to_label(a), index_to_label(b));
        // Bijective base-26: shorter labels come first, equal lengths compare lexically.
        prop_assert_eq!((la.len(), la.as_str()).cmp(&(lb.len(), lb.as_str())), a.cmp(&b));
    }

    #[test]
    fn anything_outside_uppercase_letters_is_rejected(label in "[A-Z]{0,2}[a-z0-9!: ][A-Z]{0,2}") {
        prop_assert!(label_to_index(&label).is_err());
    }
}
