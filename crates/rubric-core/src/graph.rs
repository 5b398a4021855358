//! Dependency levels over an item's constraints.
//!
//! A constraint with no dependencies sits at level 0; every other constraint
//! sits one level above its deepest dependency. Evaluating levels in
//! ascending order guarantees dependencies resolve first.

use std::collections::HashMap;

use thiserror::Error;

use crate::types::Constraint;

/// Errors in a constraint dependency graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate point id {0}")]
    DuplicatePointId(i64),

    #[error("Constraint {point_id} depends on unknown point id {dependency}")]
    UnknownDependency { point_id: i64, dependency: i64 },

    #[error("Dependency cycle through point id {point_id}")]
    Cycle { point_id: i64 },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done(usize),
}

/// Compute the level of each constraint, in list order.
pub fn dependency_levels(constraints: &[Constraint]) -> Result<Vec<usize>, GraphError> {
    let mut index = HashMap::with_capacity(constraints.len());
    for (i, c) in constraints.iter().enumerate() {
        if index.insert(c.point_id, i).is_some() {
            return Err(GraphError::DuplicatePointId(c.point_id));
        }
    }

    let mut marks = vec![Mark::Unvisited; constraints.len()];
    for i in 0..constraints.len() {
        visit(i, constraints, &index, &mut marks)?;
    }

    Ok(marks
        .into_iter()
        .map(|m| match m {
            Mark::Done(level) => level,
            _ => 0,
        })
        .collect())
}

fn visit(
    i: usize,
    constraints: &[Constraint],
    index: &HashMap<i64, usize>,
    marks: &mut [Mark],
) -> Result<usize, GraphError> {
    match marks[i] {
        Mark::Done(level) => return Ok(level),
        Mark::Visiting => return Err(GraphError::Cycle { point_id: constraints[i].point_id }),
        Mark::Unvisited => {}
    }

    marks[i] = Mark::Visiting;
    let constraint = &constraints[i];
    let mut level = 0;
    for dep in &constraint.dependencies {
        let j = *index.get(dep).ok_or(GraphError::UnknownDependency {
            point_id: constraint.point_id,
            dependency: *dep,
        })?;
        level = level.max(visit(j, constraints, index, marks)? + 1);
    }
    marks[i] = Mark::Done(level);
    Ok(level)
}

/// Total number of levels (highest level + 1), or 0 for no constraints.
pub fn level_count(levels: &[usize]) -> usize {
    levels.iter().max().map_or(0, |max| max + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn c(id: i64, deps: &[i64]) -> Constraint {
        Constraint::new(id, format!("constraint {id}")).depends_on(deps.iter().copied())
    }

    #[test]
    fn test_independent_constraints_at_level_zero() {
        let levels = dependency_levels(&[c(1, &[]), c(2, &[]), c(3, &[])]).unwrap();
        assert_eq!(levels, vec![0, 0, 0]);
        assert_eq!(level_count(&levels), 1);
    }

    #[test]
    fn test_level_is_one_above_deepest_dependency() {
        let constraints = vec![c(4, &[1, 3]), c(1, &[]), c(2, &[1]), c(3, &[2])];
        let levels = dependency_levels(&constraints).unwrap();
        assert_eq!(levels, vec![3, 0, 1, 2]);
    }

    #[test]
    fn test_cycle_rejected() {
        let err = dependency_levels(&[c(1, &[2]), c(2, &[1])]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));

        let err = dependency_levels(&[c(1, &[1])]).unwrap_err();
        assert_eq!(err, GraphError::Cycle { point_id: 1 });
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = dependency_levels(&[c(1, &[9])]).unwrap_err();
        assert_eq!(err, GraphError::UnknownDependency { point_id: 1, dependency: 9 });
    }

    #[test]
    fn test_duplicate_point_id_rejected() {
        let err = dependency_levels(&[c(1, &[]), c(1, &[])]).unwrap_err();
        assert_eq!(err, GraphError::DuplicatePointId(1));
    }

    #[test]
    fn test_empty_list() {
        assert!(dependency_levels(&[]).unwrap().is_empty());
        assert_eq!(level_count(&[]), 0);
    }

    proptest! {
        /// Any acyclic graph (edges only point to earlier ids) gets levels
        /// strictly above every dependency's level.
        #[test]
        fn prop_levels_exceed_dependencies(edges in proptest::collection::vec(
            proptest::collection::vec(any::<prop::sample::Index>(), 0..4), 1..24)
        ) {
            let constraints: Vec<Constraint> = edges
                .iter()
                .enumerate()
                .map(|(i, deps)| {
                    let deps: Vec<i64> = if i == 0 {
                        Vec::new()
                    } else {
                        deps.iter().map(|d| d.index(i) as i64).collect()
                    };
                    c(i as i64, &deps)
                })
                .collect();

            let levels = dependency_levels(&constraints).unwrap();
            for (i, constraint) in constraints.iter().enumerate() {
                for dep in &constraint.dependencies {
                    prop_assert!(levels[i] > levels[*dep as usize]);
                }
                if constraint.dependencies.is_empty() {
                    prop_assert_eq!(levels[i], 0);
                }
            }
        }
    }
}
