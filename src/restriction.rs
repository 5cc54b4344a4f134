//! Conversion between global (L-vector) and element-local (E-vector) representations.
//!
//! The restriction operator is the only component that knows how many elements share a
//! degree of freedom. `gather` copies global entries into per-element slots (applying
//! orientation signs); `scatter_add` sums the per-element contributions back. The sum is
//! the safety-critical part: two elements sharing a degree of freedom must never race on
//! its global slot. Instead of atomics or element coloring, the restriction precomputes
//! the *transpose* of the dof map — for every global degree of freedom, the list of
//! E-vector positions referencing it — and scatters dof-major. Each output entry is then
//! written by exactly one task, so the parallel scatter is race-free by construction.

use crate::space::{SignedDof, TensorElementSpace};
use crate::storage::Backend;
use itertools::Itertools;
use rayon::iter::{IndexedParallelIterator, IntoParallelRefMutIterator, ParallelIterator};
use rayon::slice::ParallelSliceMut;

#[derive(Debug, Clone)]
pub struct ElementRestriction {
    num_dofs: usize,
    num_elements: usize,
    dofs_per_element: usize,
    backend: Backend,
    /// Forward map: E-vector position `element * dofs_per_element + slot` to signed L-dof.
    dof_map: Vec<SignedDof>,
    /// Transpose map, CSR-like: for L-dof `i`, the E-vector positions
    /// `positions[offsets[i]..offsets[i + 1]]` reference it.
    offsets: Vec<usize>,
    positions: Vec<u32>,
}

impl ElementRestriction {
    pub fn new(space: &impl TensorElementSpace, backend: Backend) -> Self {
        let num_dofs = space.num_dofs();
        let num_elements = space.num_elements();
        let dofs_per_element = space.dofs_per_element();

        let mut dof_map = vec![SignedDof::plain(0); num_elements * dofs_per_element];
        for element in 0..num_elements {
            let slots = &mut dof_map[element * dofs_per_element..(element + 1) * dofs_per_element];
            space.populate_element_dofs(slots, element);
        }

        // Invert the map with a counting sort over target dofs
        let mut offsets = vec![0usize; num_dofs + 1];
        for dof in &dof_map {
            offsets[dof.index as usize + 1] += 1;
        }
        for i in 0..num_dofs {
            offsets[i + 1] += offsets[i];
        }
        let mut positions = vec![0u32; dof_map.len()];
        let mut cursor = offsets.clone();
        for (position, dof) in dof_map.iter().enumerate() {
            let slot = &mut cursor[dof.index as usize];
            positions[*slot] = position as u32;
            *slot += 1;
        }

        Self {
            num_dofs,
            num_elements,
            dofs_per_element,
            backend,
            dof_map,
            offsets,
            positions,
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    pub fn dofs_per_element(&self) -> usize {
        self.dofs_per_element
    }

    /// E-vector length.
    pub fn local_size(&self) -> usize {
        self.num_elements * self.dofs_per_element
    }

    /// L-vector to E-vector: copy each referenced global entry into its element-local
    /// slot, applying the orientation sign. Parallel over elements; every output slot is
    /// written exactly once.
    ///
    /// # Panics
    ///
    /// Panics on size mismatches.
    pub fn gather(&self, l: &[f64], e_out: &mut [f64]) {
        assert_eq!(l.len(), self.num_dofs, "L-vector size mismatch");
        assert_eq!(e_out.len(), self.local_size(), "E-vector size mismatch");

        let dpe = self.dofs_per_element;
        let gather_element = |element: usize, out: &mut [f64]| {
            let dofs = &self.dof_map[element * dpe..(element + 1) * dpe];
            for (slot, dof) in out.iter_mut().zip(dofs) {
                *slot = dof.sign() * l[dof.index as usize];
            }
        };

        if self.backend.parallelize(self.num_elements) {
            e_out
                .par_chunks_mut(dpe)
                .enumerate()
                .for_each(|(element, out)| gather_element(element, out));
        } else {
            for (element, out) in e_out.chunks_mut(dpe).enumerate() {
                gather_element(element, out);
            }
        }
    }

    /// E-vector to L-vector: *sum* all element contributions into each global entry.
    /// Parallel over degrees of freedom via the transpose map (pull model), so no two
    /// tasks touch the same output entry.
    ///
    /// Accumulates into `l_out`; callers that want the plain scatter result must zero it
    /// first.
    ///
    /// # Panics
    ///
    /// Panics on size mismatches.
    pub fn scatter_add(&self, e: &[f64], l_out: &mut [f64]) {
        assert_eq!(e.len(), self.local_size(), "E-vector size mismatch");
        assert_eq!(l_out.len(), self.num_dofs, "L-vector size mismatch");

        let pull_dof = |dof: usize, out: &mut f64| {
            let mut sum = 0.0;
            for &position in &self.positions[self.offsets[dof]..self.offsets[dof + 1]] {
                sum += self.dof_map[position as usize].sign() * e[position as usize];
            }
            *out += sum;
        };

        if self.backend.parallelize(self.num_dofs) {
            l_out
                .par_iter_mut()
                .enumerate()
                .for_each(|(dof, out)| pull_dof(dof, out));
        } else {
            for (dof, out) in l_out.iter_mut().enumerate() {
                pull_dof(dof, out);
            }
        }
    }

    /// Number of elements referencing each global degree of freedom.
    pub fn multiplicity(&self) -> Vec<usize> {
        self.offsets
            .iter()
            .tuple_windows()
            .map(|(start, end)| end - start)
            .collect()
    }

    /// Signed dofs of one element, in local lexicographic order.
    pub fn element_dofs(&self, element: usize) -> &[SignedDof] {
        let dpe = self.dofs_per_element;
        &self.dof_map[element * dpe..(element + 1) * dpe]
    }
}
