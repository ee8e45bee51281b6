//! Service placement constraints and the stable topological sort that
//! resolves them.
//!
//! Rust has no runtime class attributes, so `RunsFirst` / `RunsLast` /
//! `RunsBefore(T)` / `RunsAfter(T)` become a [`Placement`] declared at
//! registration time. Targeting another service requires that service to be
//! registered with a tag (its concrete type).

use std::any::TypeId;

use crate::error::ConfigurationError;

/// Ordering constraints for one registered service.
#[derive(Clone, Default)]
pub struct Placement {
    pub(crate) first: bool,
    pub(crate) last: bool,
    pub(crate) before: Vec<(TypeId, &'static str)>,
    pub(crate) after: Vec<(TypeId, &'static str)>,
    pub(crate) tag: Option<(TypeId, &'static str)>,
}

impl Placement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run before every service without a `first` constraint.
    pub fn first() -> Self {
        Self {
            first: true,
            ..Self::default()
        }
    }

    /// Run after every service without a `last` constraint.
    pub fn last() -> Self {
        Self {
            last: true,
            ..Self::default()
        }
    }

    /// Run before the service tagged with `T`.
    pub fn before<T: 'static>(mut self) -> Self {
        self.before
            .push((TypeId::of::<T>(), std::any::type_name::<T>()));
        self
    }

    /// Run after the service tagged with `T`.
    pub fn after<T: 'static>(mut self) -> Self {
        self.after
            .push((TypeId::of::<T>(), std::any::type_name::<T>()));
        self
    }

    /// Tag this registration with its concrete type so other services can
    /// target it with `before::<T>()` / `after::<T>()`.
    pub fn tagged<T: 'static>(mut self) -> Self {
        self.tag = Some((TypeId::of::<T>(), std::any::type_name::<T>()));
        self
    }
}

/// Reorder `placements` (given in registration order) into execution order.
///
/// Stable: unconstrained services keep registration order; ties are broken
/// by registration order (first-wins). Constraint cycles are a
/// [`ConfigurationError::OrderingCycle`].
pub(crate) fn sort_placements(
    placements: &[Placement],
) -> Result<Vec<usize>, ConfigurationError> {
    let n = placements.len();
    if n <= 1 {
        return Ok((0..n).collect());
    }

    // edges[a] contains b  <=>  a must run before b
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    let add_edge = |edges: &mut Vec<Vec<usize>>, in_degree: &mut Vec<usize>, a: usize, b: usize| {
        if a != b && !edges[a].contains(&b) {
            edges[a].push(b);
            in_degree[b] += 1;
        }
    };

    let find_tagged = |id: TypeId| -> Option<usize> {
        placements
            .iter()
            .position(|p| p.tag.map(|(t, _)| t) == Some(id))
    };

    for (i, placement) in placements.iter().enumerate() {
        if placement.first {
            for (j, other) in placements.iter().enumerate() {
                if !other.first {
                    add_edge(&mut edges, &mut in_degree, i, j);
                }
            }
        }
        if placement.last {
            for (j, other) in placements.iter().enumerate() {
                if !other.last {
                    add_edge(&mut edges, &mut in_degree, j, i);
                }
            }
        }
        for (target, _) in &placement.before {
            if let Some(j) = find_tagged(*target) {
                add_edge(&mut edges, &mut in_degree, i, j);
            }
        }
        for (target, _) in &placement.after {
            if let Some(j) = find_tagged(*target) {
                add_edge(&mut edges, &mut in_degree, j, i);
            }
        }
    }

    // Kahn's algorithm, always popping the smallest registration index so
    // the result is stable.
    let mut order = Vec::with_capacity(n);
    let mut remaining = in_degree.clone();
    let mut placed = vec![false; n];
    while order.len() < n {
        let next = (0..n).find(|&i| !placed[i] && remaining[i] == 0);
        let Some(i) = next else {
            let members = (0..n)
                .filter(|&i| !placed[i])
                .map(|i| {
                    placements[i]
                        .tag
                        .map(|(_, name)| name)
                        .unwrap_or("<untagged service>")
                })
                .collect();
            return Err(ConfigurationError::OrderingCycle { members });
        };
        placed[i] = true;
        order.push(i);
        for &j in &edges[i] {
            remaining[j] -= 1;
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;
    struct B;
    struct C;

    #[test]
    fn unconstrained_keeps_registration_order() {
        let placements = vec![Placement::new(), Placement::new(), Placement::new()];
        assert_eq!(sort_placements(&placements).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn first_and_last_move_services() {
        let placements = vec![
            Placement::new(),
            Placement::last(),
            Placement::first(),
            Placement::new(),
        ];
        assert_eq!(sort_placements(&placements).unwrap(), vec![2, 0, 3, 1]);
    }

    #[test]
    fn before_after_target_tags() {
        let placements = vec![
            Placement::new().tagged::<A>(),
            Placement::new().tagged::<B>().before::<A>(),
            Placement::new().tagged::<C>().after::<A>(),
        ];
        let order = sort_placements(&placements).unwrap();
        let pos = |i: usize| order.iter().position(|&x| x == i).unwrap();
        assert!(pos(1) < pos(0));
        assert!(pos(0) < pos(2));
    }

    #[test]
    fn cycle_is_reported() {
        let placements = vec![
            Placement::new().tagged::<A>().before::<B>(),
            Placement::new().tagged::<B>().before::<A>(),
        ];
        let err = sort_placements(&placements).unwrap_err();
        assert!(matches!(err, ConfigurationError::OrderingCycle { .. }));
    }

    #[test]
    fn unknown_target_is_ignored() {
        let placements = vec![
            Placement::new().tagged::<A>().after::<B>(),
            Placement::new(),
        ];
        assert_eq!(sort_placements(&placements).unwrap(), vec![0, 1]);
    }

    #[test]
    fn two_firsts_keep_registration_order() {
        let placements = vec![
            Placement::first().tagged::<A>(),
            Placement::first().tagged::<B>(),
            Placement::new(),
        ];
        assert_eq!(sort_placements(&placements).unwrap(), vec![0, 1, 2]);
    }
}
