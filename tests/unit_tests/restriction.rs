use matfree::restriction::ElementRestriction;
use matfree::space::{CartesianTensorSpace, TensorElementSpace};
use matfree::storage::Backend;
use proptest::prelude::*;

proptest! {
    /// gather followed by scatter_add multiplies each entry by the number of elements
    /// referencing it (for an orientation-free space).
    #[test]
    fn gather_then_scatter_scales_by_multiplicity(
        values in proptest::collection::vec(-10.0..10.0f64, 35)
    ) {
        // 3 x 2 quadratic grid: 7 x 5 = 35 nodes
        let space = CartesianTensorSpace::new(&[3, 2], &[3.0, 2.0], 2);
        let restriction = ElementRestriction::new(&space, Backend::Serial);
        prop_assert_eq!(restriction.num_dofs(), 35);

        let mut e = vec![0.0; restriction.local_size()];
        restriction.gather(&values, &mut e);
        let mut l = vec![0.0; 35];
        restriction.scatter_add(&e, &mut l);

        let multiplicity = restriction.multiplicity();
        for i in 0..35 {
            let expected = multiplicity[i] as f64 * values[i];
            prop_assert!((l[i] - expected).abs() <= 1e-12 * expected.abs().max(1.0));
        }
    }
}

/// An all-ones E-vector scattered to L yields the multiplicity map; gathering back
/// replicates each dof's multiplicity into every slot referencing it.
#[test]
fn all_ones_round_trip_yields_multiplicity() {
    let space = CartesianTensorSpace::new(&[2, 2], &[1.0, 1.0], 1);
    let restriction = ElementRestriction::new(&space, Backend::Serial);

    let e = vec![1.0; restriction.local_size()];
    let mut l = vec![0.0; restriction.num_dofs()];
    restriction.scatter_add(&e, &mut l);
    let expected: Vec<f64> = restriction.multiplicity().iter().map(|&m| m as f64).collect();
    assert_eq!(l, expected);

    let mut e_back = vec![0.0; restriction.local_size()];
    restriction.gather(&l, &mut e_back);
    for element in 0..restriction.num_elements() {
        for (slot, dof) in restriction.element_dofs(element).iter().enumerate() {
            let value = e_back[element * restriction.dofs_per_element() + slot];
            assert_eq!(value, expected[dof.index as usize]);
        }
    }
}

#[test]
fn multiplicities_sum_to_local_size() {
    let space = CartesianTensorSpace::new(&[2, 2, 2], &[1.0, 1.0, 1.0], 2);
    let restriction = ElementRestriction::new(&space, Backend::Serial);
    let total: usize = restriction.multiplicity().iter().sum();
    assert_eq!(total, restriction.local_size());
}

#[test]
fn element_dofs_cover_all_elements() {
    let space = CartesianTensorSpace::new(&[3, 1], &[3.0, 1.0], 1);
    let restriction = ElementRestriction::new(&space, Backend::Serial);
    for e in 0..space.num_elements() {
        let dofs = restriction.element_dofs(e);
        assert_eq!(dofs.len(), space.dofs_per_element());
        assert!(dofs.iter().all(|d| (d.index as usize) < space.num_dofs()));
    }
}
